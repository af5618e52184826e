use std::path::Path;

use pipekvs::protocol::{
    notification, ChannelPaths, OpCode, Request, Response, REGISTRATION_FRAME_SIZE,
    REQUEST_FRAME_SIZE,
};

#[test]
fn registration_frame_layout() {
    let paths = ChannelPaths::for_client(Path::new("/tmp"), "7");
    assert_eq!(paths.notification, Path::new("/tmp/notif7"));

    let frame = paths.encode().unwrap();
    assert_eq!(frame.len(), REGISTRATION_FRAME_SIZE);
    assert_eq!(frame[0], b'1');
    assert_eq!(&frame[1..10], b"/tmp/req7");
    assert_eq!(frame[10], 0);
    assert_eq!(&frame[41..51], b"/tmp/resp7");
    assert_eq!(&frame[81..92], b"/tmp/notif7");
    assert_eq!(frame[121], 0);
    assert_eq!(ChannelPaths::decode(&frame), Some(paths));
}

#[test]
fn overlong_paths_are_rejected() {
    let dir = Path::new("/tmp").join("d".repeat(40));
    assert!(ChannelPaths::for_client(&dir, "1").encode().is_err());
}

#[test]
fn malformed_registrations_are_rejected() {
    let frame = ChannelPaths::for_client(Path::new("/tmp"), "1")
        .encode()
        .unwrap();
    assert!(ChannelPaths::decode(&frame[..60]).is_none());

    let mut wrong_op = frame;
    wrong_op[0] = b'2';
    assert!(ChannelPaths::decode(&wrong_op).is_none());

    let mut empty_path = frame;
    empty_path[41..81].iter_mut().for_each(|b| *b = 0);
    assert!(ChannelPaths::decode(&empty_path).is_none());

    assert!(ChannelPaths::decode(&[0u8; REGISTRATION_FRAME_SIZE]).is_none());
}

#[test]
fn request_frames() {
    let frame = Request::Subscribe("key".to_string()).encode().unwrap();
    assert_eq!(frame.len(), REQUEST_FRAME_SIZE);
    assert_eq!(&frame[..4], b"3key");
    assert!(frame[4..].iter().all(|&b| b == 0));

    assert_eq!(Request::decode(b"2"), Some(Request::Disconnect));
    assert_eq!(
        Request::decode(&Request::Unsubscribe("k".to_string()).encode().unwrap()),
        Some(Request::Unsubscribe("k".to_string()))
    );
    // a subscribe needs the full frame and a key
    assert_eq!(Request::decode(b"3key"), None);
    assert_eq!(Request::decode(&[b'3'; 1]), None);
    assert_eq!(Request::decode(&[0u8; REQUEST_FRAME_SIZE]), None);
    assert_eq!(Request::decode(b""), None);
    assert!(Request::Subscribe("k".repeat(41)).encode().is_err());
}

#[test]
fn response_frames() {
    assert_eq!(&Response::success(OpCode::Connect).encode(), b"10\0");
    assert_eq!(&Response::failure(OpCode::Subscribe).encode(), b"31\0");
    assert_eq!(
        Response::decode(b"40"),
        Some(Response::success(OpCode::Unsubscribe))
    );
    assert_eq!(Response::decode(b"4x"), None);
    assert_eq!(Response::decode(b"9"), None);
}

#[test]
fn notification_messages() {
    assert_eq!(notification("x", Some("1")), "(x,1)");
    assert_eq!(notification("x", None), "(x,DELETED)");
}
