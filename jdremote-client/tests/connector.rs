mod common;

use common::*;
use jdremote_client::{ApiExecutor, Call, CloudConnector, DeviceSelector, Error};
use jdremote_core::{Payload, SessionSnapshot};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut h = Sha256::new();
    for p in parts {
        h.update(p);
    }
    h.finalize().into()
}

#[test]
fn connect_rotates_both_tokens_from_session_token() {
    let c = connected(false);
    let relay = c.transport();
    let ab12 = hex::decode("ab12").unwrap();

    c.with_session(|s| {
        assert!(s.is_connected());
        assert_eq!(s.session_token(), Some("ab12"));
        assert_eq!(s.regain_token(), Some("cd34"));
        assert_eq!(
            s.server_encryption_token(),
            Some(&sha256(&[&relay.login_secret()[..], &ab12[..]]))
        );
        assert_eq!(
            s.device_encryption_token(),
            Some(&sha256(&[&relay.device_secret()[..], &ab12[..]]))
        );
    });

    let devices = c.list_devices();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, DEVICE_ID);
    assert_eq!(devices[0].name, DEVICE_NAME);
    assert_eq!(devices[0].kind, "jd");
}

#[test]
fn connect_query_is_signed_and_escaped() {
    let c = connected(false);
    let connect = &c.transport().requests()[0];
    assert_eq!(connect.path, "/my/connect");
    assert!(connect
        .query
        .starts_with("/my/connect?email=User%40Example.com&appkey=jdremote&rid="));
}

#[test]
fn wrong_password_is_an_authentication_error() {
    let c = connector(false);
    match c.connect(EMAIL, "wrong") {
        Err(Error::Authentication { src, kind }) => {
            assert_eq!(src, "MYJD");
            assert_eq!(kind, "AUTH_FAILED");
        }
        other => panic!("expected authentication error, got {other:?}"),
    }
    assert!(!c.is_connected());
    c.with_session(|s| {
        assert!(s.login_secret().is_none());
        assert!(s.session_token().is_none());
    });
}

#[test]
fn unreachable_relay_fails_connect() {
    let c = connector(false);
    c.transport().set_relay_down(true);
    assert!(matches!(c.connect(EMAIL, PASSWORD), Err(Error::Transport(_))));
    assert!(!c.is_connected());
}

#[test]
fn calls_before_connect_are_rejected() {
    let c = connector(false);
    assert!(matches!(c.refresh_devices(), Err(Error::NotConnected)));
    assert!(matches!(
        c.get_device(DeviceSelector::Name(DEVICE_NAME)),
        Err(Error::NotConnected)
    ));
    assert!(matches!(c.reconnect(), Err(Error::NotConnected)));
    assert!(c.transport().requests().is_empty());
}

#[test]
fn unknown_device_is_not_found() {
    let c = connected(false);
    match c.get_device(DeviceSelector::Name("Kitchen")) {
        Err(Error::NotFound(name)) => assert_eq!(name, "Kitchen"),
        Err(e) => panic!("expected NotFound, got {e}"),
        Ok(_) => panic!("expected NotFound"),
    }
    assert!(c.get_device(DeviceSelector::Id(DEVICE_ID)).is_ok());
}

#[test]
fn stale_rid_is_discarded_and_rid_still_advances() {
    let c = connected(false);
    let before = c.request_id();
    c.transport().stale_next();

    let out = c
        .request_signed(Call::Get {
            path: "/my/listdevices",
            query: &[("sessiontoken", "ab12")],
        })
        .unwrap();
    assert!(out.is_none());
    assert!(c.request_id() > before);

    let sent = c.transport().requests().last().unwrap().rid;
    assert_eq!(sent, before);
    let again = c
        .request_signed(Call::Get {
            path: "/my/listdevices",
            query: &[("sessiontoken", "ab12")],
        })
        .unwrap();
    assert!(again.is_some());
}

#[test]
fn request_ids_strictly_increase() {
    let c = connected(false);
    for _ in 0..5 {
        c.refresh_devices().unwrap();
    }
    let rids: Vec<u64> = c.transport().requests().iter().map(|r| r.rid).collect();
    assert!(rids.windows(2).all(|w| w[0] < w[1]), "{rids:?}");
}

#[test]
fn reconnect_chains_server_token() {
    let c = connected(false);
    let old_server = c.with_session(|s| *s.server_encryption_token().unwrap());
    c.reconnect().unwrap();

    let ef56 = hex::decode("ef56").unwrap();
    let relay = c.transport();
    c.with_session(|s| {
        assert_eq!(s.session_token(), Some("ef56"));
        assert_eq!(s.regain_token(), Some("0789"));
        assert_eq!(s.server_encryption_token(), Some(&sha256(&[&old_server[..], &ef56[..]])));
        assert_eq!(
            s.device_encryption_token(),
            Some(&sha256(&[&relay.device_secret()[..], &ef56[..]]))
        );
    });
    assert_eq!(c.refresh_devices().unwrap().len(), 1);
}

#[test]
fn rejected_reconnect_clears_session() {
    let c = connected(false);
    c.reconnect().unwrap();
    // regain token "0789" is unknown to the relay
    assert!(matches!(c.reconnect(), Err(Error::Authentication { .. })));
    assert!(!c.is_connected());
}

#[test]
fn gateway_page_on_connect_is_a_protocol_error() {
    let c = connector(false);
    c.transport().set_gateway_error(true);
    match c.connect(EMAIL, PASSWORD) {
        Err(Error::Protocol { src, kind, .. }) => {
            assert_eq!(src, "unknown");
            assert!(kind.contains("502"), "{kind}");
        }
        other => panic!("expected protocol error, got {other:?}"),
    }
    assert!(!c.is_connected());
}

#[test]
fn gateway_page_on_reconnect_keeps_session() {
    let c = connected(false);
    c.transport().set_gateway_error(true);
    assert!(matches!(c.reconnect(), Err(Error::Protocol { .. })));
    assert!(c.is_connected());
    assert_eq!(c.session_token().as_deref(), Some("ab12"));
    c.with_session(|s| assert_eq!(s.regain_token(), Some("cd34")));

    c.transport().set_gateway_error(false);
    c.reconnect().unwrap();
    assert_eq!(c.session_token().as_deref(), Some("ef56"));
}

#[test]
fn disconnect_clears_session() {
    let c = connected(false);
    c.disconnect().unwrap();
    assert!(!c.is_connected());
    assert!(c.session_token().is_none());
    assert!(c.list_devices().is_empty());
    assert_eq!(c.transport().requests().last().unwrap().path, "/my/disconnect");
}

#[test]
fn envelope_encodes_params_and_bare_nulls() {
    let c = connected(false);
    let mut dev = c.get_device(DeviceSelector::Id(DEVICE_ID)).unwrap();
    let out = dev
        .execute(
            "/linkgrabberv2/addLinks",
            &[Value::Null, json!("a"), json!([1, 2]), json!({"k": 1})],
            false,
        )
        .unwrap();
    let data = out.and_then(Payload::into_json).unwrap();
    assert_eq!(data["via"], json!(RELAY));

    let req = c.transport().requests().last().unwrap().clone();
    let envelope = req.envelope.unwrap();
    assert_eq!(envelope["apiVer"], json!(1));
    assert_eq!(envelope["url"], json!("/linkgrabberv2/addLinks"));
    assert_eq!(
        envelope["params"],
        json!([null, "\"a\"", [1, 2], "{\"k\":1}"])
    );
}

#[test]
fn binary_calls_return_raw_bytes() {
    let c = connected(false);
    let mut dev = c.get_device(DeviceSelector::Id(DEVICE_ID)).unwrap();
    let out = dev.execute(BINARY_PATH, &[], true).unwrap();
    assert_eq!(out, Some(Payload::Binary(BINARY_BODY.to_vec())));
}

#[test]
fn relay_post_failure_is_a_null_result() {
    let c = connected(false);
    let mut dev = c.get_device(DeviceSelector::Id(DEVICE_ID)).unwrap();
    c.transport().set_relay_down(true);
    assert_eq!(dev.execute("/jd/version", &[], false).unwrap(), None);
}

#[test]
fn device_resource_through_relay() {
    let c = connected(false);
    let mut dev = c.get_device(DeviceSelector::Id(DEVICE_ID)).unwrap();
    assert!(dev.device().ping().unwrap());
    assert_eq!(
        c.transport().device_calls(),
        vec![(RELAY.to_string(), "/device/ping".to_string())]
    );
}

#[test]
fn restored_session_resumes_without_login() {
    let c = connected(false);
    let bytes = c.snapshot().to_bytes().unwrap();
    let rid = c.request_id();

    let resumed = CloudConnector::with_transport(config(false), c.transport().clone());
    resumed.restore(&SessionSnapshot::from_bytes(&bytes).unwrap()).unwrap();
    assert!(resumed.is_connected());
    assert_eq!(resumed.session_token().as_deref(), Some("ab12"));
    assert!(resumed.request_id() >= rid);

    let logins_before = c
        .transport()
        .requests()
        .iter()
        .filter(|r| r.path == "/my/connect")
        .count();
    assert_eq!(resumed.refresh_devices().unwrap().len(), 1);
    let mut dev = resumed.get_device(DeviceSelector::Name(DEVICE_NAME)).unwrap();
    assert!(dev.execute("/jd/version", &[], false).unwrap().is_some());
    let logins_after = c
        .transport()
        .requests()
        .iter()
        .filter(|r| r.path == "/my/connect")
        .count();
    assert_eq!(logins_before, logins_after);
}
