//! MQTT log bus client

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::topics::Topics;
use crate::bus::{BusMessage, BusSubscription, LogBus};
use crate::errors::PipelineError;
use crate::storage::settings::BusSettings;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// MQTT broker address
#[derive(Debug, Clone)]
pub struct MqttAddress {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    /// Optional path to a PEM-encoded CA certificate for broker verification.
    /// When `None` and `use_tls` is `true`, the system certificate store is used.
    pub ca_cert_path: Option<String>,
}

impl From<&BusSettings> for MqttAddress {
    fn from(settings: &BusSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            use_tls: settings.tls,
            ca_cert_path: settings.ca_cert_path.clone(),
        }
    }
}

fn bus_err(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::BusError(e.to_string())
}

/// Longest a publish waits for room in the request queue while connected
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest `close` waits for queued publishes to be flushed
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Log bus over an MQTT broker.
///
/// Publishes at QoS 0. The event loop runs on a background task that feeds
/// incoming log messages to local subscribers. While the broker is
/// unreachable, publishes never wait: messages that do not fit the request
/// queue are dropped.
pub struct MqttBus {
    client: AsyncClient,
    incoming: broadcast::Sender<BusMessage>,
    subscribed: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBus {
    /// Connect to the broker. Must be called from within a tokio runtime.
    pub fn connect(settings: &BusSettings) -> Result<Self, PipelineError> {
        let address = MqttAddress::from(settings);
        if address.host.is_empty() {
            return Err(PipelineError::ConfigError(
                "log bus host is not configured".to_string(),
            ));
        }

        let client_id = format!(
            "{}-{}",
            settings.client_prefix,
            &uuid::Uuid::new_v4().simple().to_string()[..12]
        );

        let mut options = MqttOptions::new(&client_id, &address.host, address.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);

        if address.use_tls {
            configure_tls(&mut options, &address)?;
        }

        let (client, eventloop) = AsyncClient::new(options, 256);
        let (incoming, _) = broadcast::channel(1024);
        let subscribed = Arc::new(AtomicBool::new(false));
        let connected = Arc::new(AtomicBool::new(false));

        let driver = tokio::spawn(drive(
            eventloop,
            client.clone(),
            incoming.clone(),
            subscribed.clone(),
            connected.clone(),
        ));

        info!(
            "Log bus client {} connecting to {}:{}",
            client_id, address.host, address.port
        );

        Ok(Self {
            client,
            incoming,
            subscribed,
            connected,
            driver: Mutex::new(Some(driver)),
        })
    }
}

fn configure_tls(options: &mut MqttOptions, address: &MqttAddress) -> Result<(), PipelineError> {
    use rumqttc::{TlsConfiguration, Transport};
    use rustls::ClientConfig;

    let mut root_cert_store = rustls::RootCertStore::empty();

    if let Some(ref ca_path) = address.ca_cert_path {
        let ca_pem = std::fs::read(ca_path).map_err(|e| {
            PipelineError::ConfigError(format!("failed to read CA cert {ca_path}: {e}"))
        })?;
        let mut cursor = std::io::Cursor::new(ca_pem);
        for cert in rustls_pemfile::certs(&mut cursor).flatten() {
            let _ = root_cert_store.add(cert);
        }
    } else {
        for cert in rustls_native_certs::load_native_certs().unwrap_or_default() {
            let _ = root_cert_store.add(cert);
        }
    }

    let client_config = ClientConfig::builder()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();

    options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
        Arc::new(client_config),
    )));
    Ok(())
}

/// Poll the event loop until the client disconnects
async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    incoming: broadcast::Sender<BusMessage>,
    subscribed: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
) {
    let cooldown = CooldownOptions::default();
    let mut failures: u32 = 0;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let Some(deployment_id) = Topics::parse_deployment_id(&publish.topic) else {
                    debug!("Ignoring message on topic {}", publish.topic);
                    continue;
                };
                let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                let _ = incoming.send(BusMessage {
                    deployment_id,
                    payload,
                });
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Log bus connected");
                failures = 0;
                connected.store(true, Ordering::SeqCst);
                // clean sessions drop subscriptions on reconnect
                if subscribed.load(Ordering::SeqCst) {
                    if let Err(e) = client.try_subscribe(Topics::LOGS_PATTERN, QoS::AtMostOnce) {
                        warn!("Failed to restore log subscription: {}", e);
                    }
                }
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                debug!("Subscription acknowledged");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("Log bus disconnected");
                connected.store(false, Ordering::SeqCst);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                connected.store(false, Ordering::SeqCst);
                let delay = calc_exp_backoff(&cooldown, failures);
                failures = failures.saturating_add(1);
                error!("Log bus connection error: {}. Reconnecting in {:?}", e, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[async_trait]
impl LogBus for MqttBus {
    async fn publish(&self, deployment_id: &str, payload: String) -> Result<(), PipelineError> {
        let topic = Topics::deployment_logs(deployment_id);
        if !self.connected.load(Ordering::SeqCst) {
            return self
                .client
                .try_publish(topic, QoS::AtMostOnce, false, payload)
                .map_err(bus_err);
        }

        match tokio::time::timeout(
            PUBLISH_TIMEOUT,
            self.client.publish(topic, QoS::AtMostOnce, false, payload),
        )
        .await
        {
            Ok(result) => result.map_err(bus_err),
            Err(_) => Err(bus_err("publish timed out, request queue full")),
        }
    }

    async fn subscribe_logs(&self) -> Result<BusSubscription, PipelineError> {
        let rx = self.incoming.subscribe();
        if !self.subscribed.swap(true, Ordering::SeqCst) {
            self.client
                .subscribe(Topics::LOGS_PATTERN, QoS::AtMostOnce)
                .await
                .map_err(bus_err)?;
            info!("Subscribed to: {}", Topics::LOGS_PATTERN);
        }
        Ok(BusSubscription::new(rx))
    }

    async fn close(&self) -> Result<(), PipelineError> {
        let Some(mut driver) = self.driver.lock().await.take() else {
            return Ok(());
        };

        if self.connected.load(Ordering::SeqCst) {
            // queued publishes go out ahead of the disconnect request
            let flush = async {
                self.client.disconnect().await.map_err(bus_err)?;
                (&mut driver)
                    .await
                    .map_err(|e| bus_err(format!("event loop task failed: {}", e)))
            };
            match tokio::time::timeout(CLOSE_TIMEOUT, flush).await {
                Ok(result) => return result,
                Err(_) => warn!("Timed out waiting for the log bus to flush"),
            }
        } else {
            warn!("Log bus not connected, dropping queued messages");
        }

        driver.abort();
        Ok(())
    }
}
