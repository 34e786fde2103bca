use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bosch_gateway::datapoint::write_document;
use bosch_gateway::{DataPath, DataPoint, Resource, Value};

use futures_util::stream::{self, BoxStream, StreamExt};

use indexmap::{IndexMap, IndexSet};

use serde::Serialize;

use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::MissedTickBehavior;

use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::session::{ConnectionState, Session, SessionEvent};
use crate::transport::xmpp::StanzaConnector;
use crate::transport::{Request, RequestTimeout, Transport, TransportKind};

// Gateway information paths.
const UUID_PATH: &str = "/gateway/uuid";
const FIRMWARE_PATH: &str = "/gateway/versionFirmware";
const DATE_PATH: &str = "/gateway/DateTime";

/// General information about a gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GatewayInfo {
    /// Gateway UUID.
    pub uuid: Option<String>,
    /// Firmware version.
    pub firmware: Option<String>,
    /// Gateway date and time.
    pub date: Option<String>,
}

/// A stream of data point updates.
pub type DataPointStream<'a> = BoxStream<'a, Result<DataPoint>>;

/// A client for a single Bosch heating gateway.
///
/// The transport is selected by the [`GatewayConfig`], while the API stays
/// the same for both of them. All methods take `&self`, so a gateway can be
/// shared among tasks through an [`Arc`].
///
/// Every successful read or write refreshes a cache of the last known data
/// points, which is used to validate writes before they reach the network.
#[derive(Debug)]
pub struct Gateway {
    config: GatewayConfig,
    session: Session,
    timeout: Arc<RequestTimeout>,
    connector: Option<Arc<dyn StanzaConnector>>,
    cache: RwLock<IndexMap<DataPath, DataPoint>>,
    watched: Mutex<IndexSet<DataPath>>,
}

impl Gateway {
    /// Creates a [`Gateway`] from its [`GatewayConfig`].
    ///
    /// No connection is opened until [`Gateway::connect`] is called.
    ///
    /// # Errors
    ///
    /// A crypto error is returned when the configured raw key is invalid.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let codec = config.codec()?;
        let timeout = Arc::new(RequestTimeout::new(config.request_timeout()));
        Ok(Self {
            config,
            session: Session::new(codec),
            timeout,
            connector: None,
            cache: RwLock::new(IndexMap::new()),
            watched: Mutex::new(IndexSet::new()),
        })
    }

    /// Creates a [`Gateway`] which opens its XMPP connections through the
    /// given [`StanzaConnector`].
    ///
    /// # Errors
    ///
    /// A crypto error is returned when the configured raw key is invalid.
    pub fn with_connector(
        config: GatewayConfig,
        connector: impl StanzaConnector,
    ) -> Result<Self> {
        let mut gateway = Self::new(config)?;
        gateway.connector = Some(Arc::new(connector));
        Ok(gateway)
    }

    /// Opens the connection.
    ///
    /// Calling this method on a connected gateway replaces the connection.
    ///
    /// # Errors
    ///
    /// A transport error is returned when the gateway is unreachable,
    /// rejects the credentials, or does not answer in time.
    pub async fn connect(&self) -> Result<()> {
        let kind = self.config.transport();
        let _ = self.session.state().apply(SessionEvent::Connect);
        info!("Connecting to gateway `{}` over {kind}", self.config.host());

        let transport = Transport::connect(
            &self.config,
            self.session.codec(),
            self.timeout.clone(),
            self.connector.clone(),
            self.session.state().clone(),
        )
        .await;

        match transport {
            Ok(transport) => {
                self.session.install(transport).await;
                info!("Connected to gateway `{}`", self.config.host());
                Ok(())
            }
            Err(e) => {
                let _ = self.session.state().apply(SessionEvent::ConnectFailed);
                warn!("Connection to gateway `{}` failed: {e}", self.config.host());
                Err(e)
            }
        }
    }

    /// Reads a data point.
    ///
    /// # Errors
    ///
    /// An error is returned when the path is invalid, the gateway is not
    /// connected, the request fails, or the reply is not a data point.
    pub async fn get(&self, path: &str) -> Result<DataPoint> {
        let path = parse_path(path)?;
        self.get_point(&path).await
    }

    /// Writes a data point and returns it updated.
    ///
    /// The value is validated against the last known data point, which is
    /// read first when unknown.
    ///
    /// # Errors
    ///
    /// A validation error is returned, before any write is sent, when the
    /// value does not match the data point kind, is outside its range or
    /// allowed values, or the data point is read-only. Request failures are
    /// returned as in [`Gateway::get`].
    pub async fn set(&self, path: &str, value: impl Into<Value>) -> Result<DataPoint> {
        let path = parse_path(path)?;
        let value = value.into();

        let known = self.cache.read().await.get(&path).cloned();
        let mut point = match known {
            Some(point) => point,
            None => self.get_point(&path).await?,
        };

        point
            .validate(&value)
            .map_err(|e| Error::from(e).with_path(&path))?;

        let body = write_document(&value)?;
        let _ = self.request(Request::put(path.clone(), body)).await?;
        debug!("Wrote `{value}` to `{path}`");

        point.update(value);
        let _ = self.cache.write().await.insert(path, point.clone());
        Ok(point)
    }

    /// Adds a path to the paths polled by [`Gateway::subscribe`] over HTTP.
    ///
    /// Paths read with [`Gateway::get`] are polled as well.
    ///
    /// # Errors
    ///
    /// A validation error is returned when the path is invalid.
    pub async fn watch(&self, path: &str) -> Result<()> {
        let path = parse_path(path)?;
        let _ = self.watched.lock().await.insert(path);
        Ok(())
    }

    /// Returns a stream of data point updates.
    ///
    /// Over XMPP, the stream yields the data points pushed by the gateway in
    /// arrival order, and ends when the current connection ends. Over HTTP,
    /// the stream reads every watched path on each polling round, and ends
    /// when the gateway is closed.
    ///
    /// # Errors
    ///
    /// A not connected error is returned when the gateway is not connected.
    pub async fn subscribe(&self) -> Result<DataPointStream<'_>> {
        let transport = self.session.transport().await?;
        match transport.kind() {
            TransportKind::Xmpp => Ok(self.push_stream(&transport)),
            TransportKind::Http => Ok(self.polling_stream()),
        }
    }

    fn push_stream(&self, transport: &Transport) -> DataPointStream<'_> {
        transport
            .receive_stream()
            .filter_map(move |push| async move {
                let payload = match push {
                    Ok(payload) => payload,
                    Err(e) => return Some(Err(e)),
                };
                match Resource::parse(&payload, None) {
                    Ok(Resource::DataPoint(point)) => {
                        let _ = self
                            .cache
                            .write()
                            .await
                            .insert(point.path().clone(), point.clone());
                        Some(Ok(point))
                    }
                    Ok(resource) => {
                        debug!("Ignored push of `{}`", resource.path());
                        None
                    }
                    Err(e) => Some(Err(e.into())),
                }
            })
            .boxed()
    }

    fn polling_stream(&self) -> DataPointStream<'_> {
        let mut ticker = tokio::time::interval(self.config.polling_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        stream::unfold(
            (ticker, VecDeque::new()),
            move |(mut ticker, mut queue)| async move {
                loop {
                    if let Some(path) = queue.pop_front() {
                        let point = self.get_point(&path).await;
                        if point
                            .as_ref()
                            .is_err_and(|e| e.kind() == ErrorKind::NotConnected)
                        {
                            return None;
                        }
                        return Some((point, (ticker, queue)));
                    }

                    let _ = ticker.tick().await;
                    if self.state() != ConnectionState::Connected {
                        return None;
                    }
                    queue = self.watched.lock().await.iter().cloned().collect();
                }
            },
        )
        .boxed()
    }

    /// Closes the connection.
    ///
    /// Requests issued afterwards fail until [`Gateway::connect`] is called
    /// again.
    pub async fn close(&self) {
        self.session.close().await;
        info!("Closed gateway `{}`", self.config.host());
    }

    /// Reads the gateway UUID.
    ///
    /// Returns `None` when the gateway answers with an error status.
    ///
    /// # Errors
    ///
    /// Every failure other than an error status is returned.
    pub async fn check_connection(&self) -> Result<Option<String>> {
        match self.get(UUID_PATH).await {
            Ok(point) => Ok(Some(point.value().to_string())),
            Err(e) if e.kind() == ErrorKind::Device => {
                debug!("Failed to check the connection: {e}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Reads the gateway UUID, firmware version, and date.
    ///
    /// Fields the gateway does not expose are `None`.
    ///
    /// # Errors
    ///
    /// Every failure other than an error status is returned.
    pub async fn info(&self) -> Result<GatewayInfo> {
        Ok(GatewayInfo {
            uuid: self.optional_text(UUID_PATH).await?,
            firmware: self.optional_text(FIRMWARE_PATH).await?,
            date: self.optional_text(DATE_PATH).await?,
        })
    }

    /// Reads the gateway date and time.
    ///
    /// # Errors
    ///
    /// An error is returned as in [`Gateway::get`].
    pub async fn current_date(&self) -> Result<String> {
        self.get(DATE_PATH)
            .await
            .map(|point| point.value().to_string())
    }

    /// Changes the timeout of subsequent network-bound operations.
    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout.set(timeout);
        debug!("Timeout set to {:?}", self.timeout.get());
    }

    /// Returns the timeout of network-bound operations.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout.get()
    }

    /// Returns the current [`ConnectionState`].
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.session.state().get()
    }

    /// Returns a receiver notified on every [`ConnectionState`] change.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.session.state().subscribe()
    }

    /// Returns the [`GatewayConfig`].
    #[must_use]
    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Returns the last known value of a data point, without any request.
    pub async fn cached(&self, path: &str) -> Option<DataPoint> {
        let path = DataPath::new(path).ok()?;
        self.cache.read().await.get(&path).cloned()
    }

    /// Returns all the last known data points, in the order they were first
    /// read.
    pub async fn data_points(&self) -> Vec<DataPoint> {
        self.cache.read().await.values().cloned().collect()
    }

    pub(crate) async fn get_point(&self, path: &DataPath) -> Result<DataPoint> {
        let payload = self.request(Request::get(path.clone())).await?;
        let point =
            DataPoint::from_document(path, &payload).map_err(|e| Error::from(e).with_path(path))?;

        let _ = self.cache.write().await.insert(path.clone(), point.clone());
        let _ = self.watched.lock().await.insert(path.clone());
        Ok(point)
    }

    pub(crate) async fn request(&self, request: Request) -> Result<Vec<u8>> {
        let transport = self
            .session
            .transport()
            .await
            .map_err(|e| e.with_path(&request.path))?;

        match transport.send_request(request).await {
            Err(e) if e.is_timeout() => {
                if self.session.fail(&transport).await {
                    warn!("{e}, the session is marked as failed");
                } else {
                    debug!("{e}, on a connection which has already been replaced");
                }
                Err(e)
            }
            reply => reply,
        }
    }

    async fn optional_text(&self, path: &str) -> Result<Option<String>> {
        match self.get(path).await {
            Ok(point) => Ok(Some(point.value().to_string())),
            Err(e) if e.kind() == ErrorKind::Device => {
                debug!("`{path}` is not available: {e}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

pub(crate) fn parse_path(path: &str) -> Result<DataPath> {
    DataPath::new(path).map_err(Error::from)
}
