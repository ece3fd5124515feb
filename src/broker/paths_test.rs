use super::*;

#[test]
fn test_bijection() {
    let (a, b) = (EndpointId::generate(), EndpointId::generate());
    let mut table = PathTable::new("test");

    table.add_outbound(1, a);
    table.add_inbound(2, a);
    table.add_outbound(3, b);

    assert_eq!(table.outbound_slot(&a), Some(1));
    assert_eq!(table.outbound_peer(1), Some(a));
    assert_eq!(table.inbound_slot(&a), Some(2));
    assert_eq!(table.inbound_peer(2), Some(a));
    assert_eq!(table.outbound_slot(&b), Some(3));
    assert_eq!(table.inbound_slot(&b), None);

    assert!(table.is_peered(&a));
    assert!(table.is_connected(&b));
    assert!(!table.is_peered(&b));
    let mut expect = vec![a, b];
    expect.sort();
    assert_eq!(table.peers(), expect);
}

#[test]
fn test_duplicate_insert() {
    let (a, b) = (EndpointId::generate(), EndpointId::generate());
    let mut table = PathTable::new("test");

    table.add_outbound(1, a);
    // duplicate slot is reported and the original entry is kept.
    table.add_outbound(1, b);
    assert_eq!(table.outbound_peer(1), Some(a));
    assert_eq!(table.outbound_slot(&b), None);

    // invalid slot is rejected.
    table.add_inbound(INVALID_SLOT, a);
    assert_eq!(table.inbound_slot(&a), None);
}

#[test]
fn test_remove_pairs() {
    let a = EndpointId::generate();
    let mut table = PathTable::new("test");

    table.add_outbound(1, a);
    table.add_inbound(2, a);

    assert_eq!(table.remove_outbound(&a), Some(1));
    assert_eq!(table.outbound_peer(1), None);
    assert_eq!(table.outbound_slot(&a), None);
    assert!(table.is_connected(&a));

    assert_eq!(table.remove_inbound(&a), Some(2));
    assert!(!table.is_connected(&a));
    assert_eq!(table.remove_outbound(&a), None);

    assert!(table.outbound_is_empty());
    assert_eq!(table.num_inbound(), 0);
}
