use ferrum_types::*;
use serde_json as json;

#[test]
fn request_ids_are_monotonic_and_unique() {
    let gen = RequestIdGenerator::new();
    assert!(gen.last_issued().is_none());

    let r1 = gen.next_id();
    let r2 = gen.next_id();
    assert_eq!(r1, RequestId(1));
    assert_eq!(r2, RequestId(2));
    assert!(r1 < r2);
    assert_eq!(gen.last_issued(), Some(r2));
}

#[test]
fn request_ids_unique_across_threads() {
    let gen = std::sync::Arc::new(RequestIdGenerator::new());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let gen = gen.clone();
            std::thread::spawn(move || (0..250).map(|_| gen.next_id()).collect::<Vec<_>>())
        })
        .collect();

    let mut all: Vec<RequestId> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 1000);
}

#[test]
fn token_id_conversions_and_display() {
    let t: TokenId = 42u32.into();
    assert_eq!(t.get(), 42);
    assert_eq!(u32::from(t), 42);
    assert_eq!(t.to_string(), "42");
    assert_eq!(RequestId(7).to_string(), "7");
}

#[test]
fn request_id_serializes_as_plain_number() {
    let id = RequestId(9);
    let s = json::to_string(&id).unwrap();
    assert_eq!(s, "9");
    let back: RequestId = json::from_str(&s).unwrap();
    assert_eq!(back, id);
}
