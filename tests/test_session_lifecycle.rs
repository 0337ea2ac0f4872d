//! Session creation, option handling, and teardown.


use hublink::config::DeviceConfig;
use hublink::session::{SendStatus, Session, SessionState};
use hublink::testing::{FakeSigner, MockEngine, RecordingHandler};
use hublink::SessionError;

#[test]
fn test_create_then_destroy_touches_no_network() {
    let engine = MockEngine::new();
    let handle = engine.handle();
    let session = Session::create_with(
        test_helpers::key_config(),
        Some(Box::new(FakeSigner)),
        Box::new(engine),
        Box::new(hublink::testing::ManualClock::new()),
    )
    .expect("session should build");

    let mut handler = RecordingHandler::new();
    session.destroy(&mut handler);

    assert!(handle.connects().is_empty());
    assert!(handle.publishes().is_empty());
    assert_eq!(handle.disconnects(), 0);
    assert!(handler.completions.is_empty());
}

#[test]
fn test_create_rejects_oversized_device_id() {
    let config = DeviceConfig {
        device_id: "x".repeat(129),
        ..test_helpers::key_config()
    };
    let result = Session::create(config, Some(Box::new(FakeSigner)));
    assert!(matches!(result, Err(SessionError::Config(_))));
}

#[test]
fn test_create_rejects_conflicting_credentials() {
    let config = DeviceConfig {
        sas_token: Some("SharedAccessSignature sr=s&sig=x&se=9999999999".to_string()),
        ..test_helpers::key_config()
    };
    let result = Session::create(config, Some(Box::new(FakeSigner)));
    assert!(matches!(result, Err(SessionError::Config(_))));
}

#[test]
fn test_device_key_without_signer_fails() {
    let result = Session::create(test_helpers::key_config(), None);
    assert!(matches!(result, Err(SessionError::Auth(_))));
}

#[test]
fn test_idle_session_does_not_connect() {
    let (mut session, handle, _clock) = test_helpers::scripted_session();
    let mut handler = RecordingHandler::new();

    for _ in 0..5 {
        session.do_work(&mut handler).expect("do_work");
    }
    assert!(handle.connects().is_empty());
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn test_send_status_tracks_queue() {
    let (mut session, handle, _clock) = test_helpers::scripted_session();
    handle.auto_puback(true);
    let mut handler = RecordingHandler::new();

    assert_eq!(session.get_send_status(), SendStatus::Idle);
    session
        .send_telemetry(hublink::OutboundMessage {
            payload: b"reading".to_vec(),
            properties: Default::default(),
        })
        .expect("enqueue");
    assert_eq!(session.get_send_status(), SendStatus::Busy);

    // connect, then publish and collect the ack
    session.do_work(&mut handler).expect("do_work");
    session.do_work(&mut handler).expect("do_work");
    session.do_work(&mut handler).expect("do_work");
    assert_eq!(session.get_send_status(), SendStatus::Idle);
}

#[test]
fn test_unsubscribe_without_subscribe_is_a_no_op() {
    let (mut session, handle, _clock) = test_helpers::scripted_session();
    session.unsubscribe_cloud_to_device();
    session.unsubscribe_twin();
    session.unsubscribe_methods();
    assert!(handle.unsubscribes().is_empty());
    assert!(handle.connects().is_empty());
}

#[test]
fn test_set_option_rejects_empty_name_or_value() {
    let (mut session, _handle, _clock) = test_helpers::scripted_session();
    assert!(matches!(
        session.set_option("", "true"),
        Err(SessionError::InvalidArgument(_))
    ));
    assert!(matches!(
        session.set_option("logtrace", ""),
        Err(SessionError::InvalidArgument(_))
    ));
}

#[test]
fn test_logtrace_option_reaches_engine() {
    let (mut session, handle, _clock) = test_helpers::scripted_session();
    session.set_option("logtrace", "true").expect("set");
    assert_eq!(handle.trace(), Some(true));
    assert!(matches!(
        session.set_option("logtrace", "maybe"),
        Err(SessionError::InvalidArgument(_))
    ));
}

#[test]
fn test_unknown_option_is_forwarded_to_engine() {
    let (mut session, handle, _clock) = test_helpers::scripted_session();
    session.set_option("proxy_address", "10.0.0.1").expect("set");
    assert_eq!(
        handle.io_options(),
        vec![("proxy_address".to_string(), "10.0.0.1".to_string())]
    );
}

#[test]
fn test_x509_options_require_certificate_mode() {
    let (mut session, _handle, _clock) = test_helpers::scripted_session();
    assert!(matches!(
        session.set_option("x509certificate", "PEM"),
        Err(SessionError::InvalidArgument(_))
    ));
}

#[test]
fn test_keepalive_same_value_does_not_cycle_connection() {
    let (mut session, handle, _clock) = test_helpers::scripted_session();
    let mut handler = RecordingHandler::new();
    session.subscribe_cloud_to_device();
    session.do_work(&mut handler).expect("do_work");
    assert_eq!(handle.connects().len(), 1);

    session.set_option("keepalive", "240").expect("set");
    assert_eq!(handle.disconnects(), 0);
}

#[test]
fn test_keepalive_change_cycles_connection() {
    let (mut session, handle, _clock) = test_helpers::scripted_session();
    let mut handler = RecordingHandler::new();
    session.subscribe_cloud_to_device();
    session.do_work(&mut handler).expect("do_work");
    assert_eq!(session.state(), SessionState::SteadyState);

    session.set_option("keepalive", "60").expect("set");
    assert_eq!(handle.disconnects(), 1);

    // subscription interest still pending, so the session reconnects
    session.do_work(&mut handler).expect("do_work");
    let connects = handle.connects();
    assert_eq!(connects.len(), 2);
    assert_eq!(connects[1].keep_alive_secs, 60);
}

#[test]
fn test_destroy_reports_queued_messages() {
    let (mut session, handle, _clock) = test_helpers::scripted_session();
    let mut handler = RecordingHandler::new();
    session.subscribe_cloud_to_device();
    session.do_work(&mut handler).expect("do_work");

    session
        .send_telemetry(hublink::OutboundMessage {
            payload: b"never sent".to_vec(),
            properties: Default::default(),
        })
        .expect("enqueue");
    session.destroy(&mut handler);

    assert_eq!(handle.disconnects(), 1);
    assert_eq!(handler.completions.len(), 1);
    assert_eq!(handler.completions[0].0, b"never sent");
    assert_eq!(
        handler.completions[0].1,
        hublink::CompletionStatus::Destroyed
    );
}
