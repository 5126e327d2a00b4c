use std::net::IpAddr;

use pebble::server::admission::Admission;

fn ip(last: u8) -> IpAddr {
    IpAddr::from([192, 168, 0, last])
}

#[test]
fn test_new_peer_over_cap_is_denied() {
    let admission = Admission::new(3);
    let _guards: Vec<_> = (1..=3).map(|i| admission.try_admit(ip(i)).unwrap()).collect();

    assert!(admission.try_admit(ip(4)).is_none());
    assert_eq!(admission.active_peers(), 3);
}

#[test]
fn test_known_peer_is_admitted_at_cap() {
    let admission = Admission::new(2);
    let _a = admission.try_admit(ip(1)).unwrap();
    let _b = admission.try_admit(ip(2)).unwrap();

    let again = admission.try_admit(ip(1));
    assert!(again.is_some());
    assert_eq!(admission.active_peers(), 2);
}

#[test]
fn test_released_slot_is_reusable() {
    let admission = Admission::new(1);
    let first = admission.try_admit(ip(1)).unwrap();
    assert!(admission.try_admit(ip(2)).is_none());

    drop(first);
    assert_eq!(admission.active_peers(), 0);
    assert!(admission.try_admit(ip(2)).is_some());
}

#[test]
fn test_admission_is_shared_across_clones() {
    let admission = Admission::new(1);
    let other = admission.clone();
    let _held = admission.try_admit(ip(9)).unwrap();
    assert!(other.try_admit(ip(10)).is_none());
}
