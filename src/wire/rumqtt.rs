//! Production [`WireEngine`] backed by rumqttc's synchronous client.
//!
//! rumqttc assigns its own packet ids when requests leave its channel, so the
//! adapter correlates broker acknowledgements back to the caller's packet ids
//! by arrival order: requests of each class are acknowledged in the order they
//! were issued on a single ordered connection.

use std::collections::VecDeque;
use std::time::Duration;

use rumqttc::{Client, Connection, ConnectReturnCode, Event, MqttOptions, Packet, QoS, Transport};
use tracing::{debug, trace, warn};

use super::{ConnectCode, ConnectParams, QosLevel, WireEngine, WireError, WireEvent};

const REQUEST_CHANNEL_CAPACITY: usize = 64;

pub struct RumqttEngine {
    client: Option<Client>,
    connection: Option<Connection>,
    puback_fifo: VecDeque<u16>,
    suback_fifo: VecDeque<u16>,
    unsuback_fifo: VecDeque<u16>,
    trace_packets: bool,
}

impl RumqttEngine {
    pub fn new() -> Self {
        Self {
            client: None,
            connection: None,
            puback_fifo: VecDeque::new(),
            suback_fifo: VecDeque::new(),
            unsuback_fifo: VecDeque::new(),
            trace_packets: false,
        }
    }

    fn client(&mut self) -> Result<&mut Client, WireError> {
        self.client.as_mut().ok_or(WireError::NotConnected)
    }
}

impl Default for RumqttEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn to_qos(qos: QosLevel) -> QoS {
    match qos {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
    }
}

fn to_connect_code(code: ConnectReturnCode) -> ConnectCode {
    match code {
        ConnectReturnCode::Success => ConnectCode::Accepted,
        ConnectReturnCode::RefusedProtocolVersion => ConnectCode::UnacceptableProtocolVersion,
        ConnectReturnCode::BadClientId => ConnectCode::IdentifierRejected,
        ConnectReturnCode::ServiceUnavailable => ConnectCode::ServerUnavailable,
        ConnectReturnCode::BadUserNamePassword => ConnectCode::BadUserNamePassword,
        ConnectReturnCode::NotAuthorized => ConnectCode::NotAuthorized,
    }
}

impl WireEngine for RumqttEngine {
    fn connect(&mut self, params: &ConnectParams) -> Result<(), WireError> {
        if params.x509.is_some() {
            return Err(WireError::Unsupported {
                name: "x509".to_string(),
                reason: "certificate authentication requires a custom TLS configuration"
                    .to_string(),
            });
        }

        let mut options = MqttOptions::new(&params.client_id, &params.host, params.port);
        options.set_keep_alive(Duration::from_secs(u64::from(params.keep_alive_secs)));
        options.set_clean_session(params.clean_session);
        options.set_transport(Transport::tls_with_default_config());
        if let Some(password) = &params.password {
            options.set_credentials(&params.username, password);
        }

        debug!(host = %params.host, port = params.port, "opening broker connection");
        let (client, connection) = Client::new(options, REQUEST_CHANNEL_CAPACITY);
        self.client = Some(client);
        self.connection = Some(connection);
        self.puback_fifo.clear();
        self.suback_fifo.clear();
        self.unsuback_fifo.clear();
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), WireError> {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.disconnect() {
                debug!(error = %e, "disconnect request not delivered");
            }
        }
        self.connection = None;
        self.puback_fifo.clear();
        self.suback_fifo.clear();
        self.unsuback_fifo.clear();
        Ok(())
    }

    fn publish(
        &mut self,
        packet_id: u16,
        topic: &str,
        qos: QosLevel,
        payload: &[u8],
    ) -> Result<(), WireError> {
        if self.trace_packets {
            trace!(packet_id, topic, len = payload.len(), "publish");
        }
        self.client()?
            .try_publish(topic, to_qos(qos), false, payload)
            .map_err(|e| WireError::PublishFailed(e.to_string()))?;
        if qos == QosLevel::AtLeastOnce {
            self.puback_fifo.push_back(packet_id);
        }
        Ok(())
    }

    fn subscribe(&mut self, packet_id: u16, filter: &str, qos: QosLevel) -> Result<(), WireError> {
        if self.trace_packets {
            trace!(packet_id, filter, "subscribe");
        }
        self.client()?
            .try_subscribe(filter, to_qos(qos))
            .map_err(|e| WireError::SubscribeFailed(e.to_string()))?;
        self.suback_fifo.push_back(packet_id);
        Ok(())
    }

    fn unsubscribe(&mut self, packet_id: u16, filter: &str) -> Result<(), WireError> {
        if self.trace_packets {
            trace!(packet_id, filter, "unsubscribe");
        }
        self.client()?
            .try_unsubscribe(filter)
            .map_err(|e| WireError::SubscribeFailed(e.to_string()))?;
        self.unsuback_fifo.push_back(packet_id);
        Ok(())
    }

    fn service(&mut self, sink: &mut dyn FnMut(WireEvent)) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        let mut lost = false;
        while !lost {
            match connection.try_recv() {
                Ok(Ok(Event::Incoming(packet))) => {
                    if self.trace_packets {
                        trace!(?packet, "incoming");
                    }
                    match packet {
                        Packet::ConnAck(ack) => sink(WireEvent::ConnAck {
                            session_present: ack.session_present,
                            code: to_connect_code(ack.code),
                        }),
                        Packet::PubAck(ack) => {
                            if let Some(packet_id) = self.puback_fifo.pop_front() {
                                sink(WireEvent::PubAck { packet_id });
                            } else {
                                warn!(broker_pkid = ack.pkid, "puback with no pending publish");
                            }
                        }
                        Packet::SubAck(ack) => {
                            if let Some(packet_id) = self.suback_fifo.pop_front() {
                                let granted = ack
                                    .return_codes
                                    .iter()
                                    .map(|code| match code {
                                        rumqttc::SubscribeReasonCode::Success(QoS::AtMostOnce) => {
                                            Some(QosLevel::AtMostOnce)
                                        }
                                        rumqttc::SubscribeReasonCode::Success(_) => {
                                            Some(QosLevel::AtLeastOnce)
                                        }
                                        rumqttc::SubscribeReasonCode::Failure => None,
                                    })
                                    .collect();
                                sink(WireEvent::SubAck { packet_id, granted });
                            } else {
                                warn!(broker_pkid = ack.pkid, "suback with no pending subscribe");
                            }
                        }
                        Packet::UnsubAck(ack) => {
                            if let Some(packet_id) = self.unsuback_fifo.pop_front() {
                                sink(WireEvent::UnsubAck { packet_id });
                            } else {
                                warn!(
                                    broker_pkid = ack.pkid,
                                    "unsuback with no pending unsubscribe"
                                );
                            }
                        }
                        Packet::Publish(publish) => sink(WireEvent::Message {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        }),
                        _ => {}
                    }
                }
                Ok(Ok(Event::Outgoing(_))) => {}
                Ok(Err(e)) => {
                    let is_ping_timeout = matches!(
                        &e,
                        rumqttc::ConnectionError::MqttState(
                            rumqttc::StateError::AwaitPingResp
                        )
                    );
                    if is_ping_timeout {
                        sink(WireEvent::PingTimeout);
                    } else {
                        sink(WireEvent::Disconnected {
                            reason: e.to_string(),
                        });
                    }
                    lost = true;
                }
                Err(_) => break,
            }
        }
        if lost {
            self.connection = None;
        }
    }

    fn set_trace(&mut self, enabled: bool) {
        self.trace_packets = enabled;
    }

    fn set_io_option(&mut self, name: &str, value: &str) -> Result<(), WireError> {
        Err(WireError::Unsupported {
            name: name.to_string(),
            reason: format!("engine does not accept runtime option '{name}={value}'"),
        })
    }
}
