mod common;

use std::{thread, time::Duration};

use common::{fast_builder, random_bytes, setup};
use rsp::{layer::RetryPolicy, Builder, Error};

#[test]
fn round_trip_many_fragments() {
    let (session, device) = setup(fast_builder(), 1);
    let max = session.max_fragment();
    let data = random_bytes(16 * max - 3, 2);

    session.write(0x1000, &data).unwrap();
    assert_eq!(&device.lock().unwrap().memory[0x1000..0x1000 + data.len()], &data[..]);
    assert_eq!(session.read(0x1000, data.len()).unwrap(), data);

    let stat = session.stat().unwrap();
    assert_eq!(stat.acks, 16);
    assert_eq!(stat.responses, 16);
    assert_eq!(stat.outstanding, 0);
    assert_eq!(stat.unclaimed, 0);
}

#[test]
fn survives_lossy_link() {
    let (session, device) = setup(fast_builder(), 3);
    device.lock().unwrap().drop_rate = 0.3;
    let max = session.max_fragment();
    let data = random_bytes(4 * max + 100, 4);

    session.write(0x2000, &data).unwrap();
    assert_eq!(session.read(0x2000, data.len()).unwrap(), data);
    assert!(session.stat().unwrap().retransmissions > 0);
}

#[test]
fn reassembles_reordered_responses() {
    let (session, device) = setup(fast_builder(), 5);
    let max = session.max_fragment();
    let data = random_bytes(3 * max, 6);
    device.lock().unwrap().memory[..data.len()].copy_from_slice(&data);
    device.lock().unwrap().reorder_depth = 3;

    assert_eq!(session.read(0, data.len()).unwrap(), data);
}

#[test]
fn duplicated_requests_are_harmless() {
    // device answers every resend; the extra answers must be dropped
    let builder = Builder {
        rtd: Duration::from_millis(1),
        ..Builder::default()
    };
    let (session, _device) = setup(builder, 7);
    let data = random_bytes(64, 8);
    for _ in 0..10 {
        session.write(0x40, &data).unwrap();
        assert_eq!(session.read(0x40, data.len()).unwrap(), data);
    }
    assert_eq!(session.stat().unwrap().unclaimed, 0);
}

#[test]
fn cancel_stops_retransmission() {
    let (session, device) = setup(fast_builder(), 9);
    device.lock().unwrap().silent = true;

    let pending = session.submit_write(0, &[1, 2, 3]).unwrap();
    thread::sleep(Duration::from_millis(70));
    pending.cancel();
    pending.cancel();
    assert_eq!(pending.wait(), Err(Error::Cancelled));

    let seen = device.lock().unwrap().frames_seen;
    assert!(seen >= 2);
    thread::sleep(Duration::from_millis(150));
    assert_eq!(device.lock().unwrap().frames_seen, seen);
    assert_eq!(session.stat().unwrap().outstanding, 0);
}

#[test]
fn wait_timeout_then_complete() {
    let (session, device) = setup(fast_builder(), 10);
    device.lock().unwrap().silent = true;

    let pending = session.submit_read(0, 4).unwrap();
    assert!(pending.wait_timeout(Duration::from_millis(30)).is_none());
    device.lock().unwrap().silent = false;
    assert_eq!(pending.wait(), Ok(vec![0; 4]));
}

#[test]
fn close_fails_pending_operations() {
    let (session, device) = setup(fast_builder(), 11);
    device.lock().unwrap().silent = true;

    let pending = session.submit_read(0, 16).unwrap();
    session.close();
    assert_eq!(pending.wait(), Err(Error::Closed));
    assert_eq!(session.write(0, &[1]), Err(Error::Closed));
    assert!(session.stat().is_err());
    session.close();
}

#[test]
fn bounded_retry_reports_no_response() {
    let builder = Builder {
        retry_policy: RetryPolicy::Limited {
            max_retransmissions: 2,
        },
        ..fast_builder()
    };
    let (session, device) = setup(builder, 12);
    device.lock().unwrap().silent = true;

    let res = session.read(0, 8);
    assert!(matches!(res, Err(Error::NoResponse { .. })));
    // first send plus two resends
    assert_eq!(device.lock().unwrap().frames_seen, 3);
    assert_eq!(session.stat().unwrap().give_ups, 1);
}

#[test]
fn register_access_is_single_frame() {
    let (session, device) = setup(fast_builder(), 13);
    let max = session.max_fragment();

    assert_eq!(
        session.write_register(0, &vec![0; max + 1]),
        Err(Error::PayloadTooLarge { len: max + 1, max })
    );
    assert_eq!(
        session.read_register(0, max + 1),
        Err(Error::PayloadTooLarge { len: max + 1, max })
    );
    assert_eq!(device.lock().unwrap().frames_seen, 0);

    session.write_register(0x10, &[0xde, 0xad, 0xbe, 0xef]).unwrap();
    assert_eq!(
        session.read_register(0x10, 4).unwrap(),
        vec![0xde, 0xad, 0xbe, 0xef]
    );
    assert!(device.lock().unwrap().frames_seen >= 2);
}

#[test]
fn address_overflow_is_rejected() {
    let (session, _device) = setup(fast_builder(), 14);
    assert_eq!(
        session.read(u32::MAX, 2),
        Err(Error::AddressOverflow {
            address: u32::MAX,
            len: 2
        })
    );
    assert_eq!(session.write(0, &[]), Ok(()));
    assert_eq!(session.read(0, 0), Ok(vec![]));
}

#[test]
fn round_trip_with_fcs_trailer() {
    let builder = Builder {
        fcs: true,
        ..fast_builder()
    };
    let (session, _device) = setup(builder, 15);
    let data = random_bytes(2 * session.max_fragment() + 1, 16);
    session.write(0x300, &data).unwrap();
    assert_eq!(session.read(0x300, data.len()).unwrap(), data);
    assert_eq!(session.stat().unwrap().decoding_errors, 0);
}

#[test]
fn invalid_config_is_rejected() {
    let builder = Builder {
        read_window: 0,
        ..fast_builder()
    };
    let device = std::sync::Arc::new(std::sync::Mutex::new(common::SimDevice::new(&builder, 0)));
    let res = rsp::Session::open(builder, common::SimLink::new(device));
    assert!(matches!(res, Err(Error::Build(_))));
}
