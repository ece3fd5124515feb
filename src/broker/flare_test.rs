use super::*;

#[test]
fn test_fire_extinguish_one() {
    let flare = Flare::new().unwrap();
    assert!(flare.fd() >= 0);

    assert!(!flare.extinguish_one());
    flare.fire();
    assert!(flare.extinguish_one());
    assert!(!flare.extinguish_one());
}

#[test]
fn test_extinguish_drains() {
    let flare = Flare::new().unwrap();
    for _ in 0..3 {
        flare.fire();
    }
    flare.extinguish();
    assert!(!flare.extinguish_one());
}

#[test]
fn test_fire_on_full_pipe() {
    let flare = Flare::new().unwrap();
    // a full pipe already carries the signal, firing must not spin.
    for _ in 0..100_000 {
        flare.fire();
    }
    assert!(flare.extinguish_one());
    flare.extinguish();
    assert!(!flare.extinguish_one());
}
