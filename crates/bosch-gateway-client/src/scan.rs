use bosch_gateway::{DataPath, Resource};

use indexmap::IndexSet;

use serde::Serialize;

use tracing::{debug, warn};

use crate::error::{ErrorKind, Result};
use crate::gateway::{Gateway, parse_path};
use crate::transport::Request;

/// The root paths of a gateway.
pub const ROOT_PATHS: [&str; 8] = [
    "/dhwCircuits",
    "/gateway",
    "/heatingCircuits",
    "/heatSources",
    "/notifications",
    "/recordings",
    "/solarCircuits",
    "/system",
];

/// The documents found below a path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scan {
    /// Path the walk started from.
    pub root: DataPath,
    /// Raw documents of every leaf, in depth-first order.
    pub documents: Vec<serde_json::Value>,
}

impl Gateway {
    /// Walks every root path of the gateway and collects the raw document
    /// of each leaf.
    ///
    /// Unreadable paths are logged and skipped.
    ///
    /// # Errors
    ///
    /// An error is returned when the gateway is not connected, or the
    /// connection is lost during the walk.
    pub async fn rawscan(&self) -> Result<Vec<Scan>> {
        self.smallscan(&ROOT_PATHS).await
    }

    /// Walks the given paths and collects the raw document of each leaf.
    ///
    /// # Errors
    ///
    /// An error is returned when a path is invalid, the gateway is not
    /// connected, or the connection is lost during the walk.
    pub async fn smallscan(&self, paths: &[&str]) -> Result<Vec<Scan>> {
        let roots = paths
            .iter()
            .map(|path| parse_path(path))
            .collect::<Result<Vec<_>>>()?;

        let mut scans = Vec::with_capacity(roots.len());
        for root in roots {
            let documents = self.walk(&root).await?;
            debug!("Scanned {} documents below `{root}`", documents.len());
            scans.push(Scan { root, documents });
        }
        Ok(scans)
    }

    async fn walk(&self, root: &DataPath) -> Result<Vec<serde_json::Value>> {
        let mut documents = Vec::new();
        let mut visited = IndexSet::new();
        let mut stack = vec![root.clone()];

        while let Some(path) = stack.pop() {
            if !visited.insert(path.clone()) {
                continue;
            }

            let payload = match self.request(Request::get(path.clone())).await {
                Ok(payload) => payload,
                Err(e) if e.kind() == ErrorKind::NotConnected => return Err(e),
                Err(e) => {
                    warn!("Skipped `{path}`: {e}");
                    continue;
                }
            };

            let document: serde_json::Value = match serde_json::from_slice(&payload) {
                Ok(document) => document,
                Err(e) => {
                    warn!("Skipped `{path}`, invalid document: {e}");
                    continue;
                }
            };

            match Resource::parse(&payload, Some(&path)) {
                // Reversed, so that references are visited in their order.
                Ok(Resource::References { references, .. }) => {
                    stack.extend(references.into_iter().rev());
                }
                _ => documents.push(document),
            }
        }

        Ok(documents)
    }
}
