/// Check that `$obj` survives a round trip through JSON and Message Pack. The calling crate needs `serde_json`
/// and `rmp_serde`.
#[macro_export]
macro_rules! test_serialization {
    ($obj_type:ty, $obj: expr, $Instant: ident) => {
        let start = $Instant::now();
        let ser = serde_json::to_string(&$obj).unwrap();
        println!("Serialized JSON size: {}", ser.len());
        let deser = serde_json::from_str::<$obj_type>(&ser).unwrap();
        println!("JSON round trip time: {:?}", start.elapsed());
        assert_eq!($obj, deser);

        let ser = rmp_serde::to_vec_named(&$obj).unwrap();
        println!("Serialized Message Pack size: {}", ser.len());
        let deser = rmp_serde::from_slice::<$obj_type>(&ser).unwrap();
        assert_eq!($obj, deser);
    };
    ($obj_type:ty, $obj: expr) => {
        // Test JSON serialization
        let ser = serde_json::to_string(&$obj).unwrap();
        let deser = serde_json::from_str::<$obj_type>(&ser).unwrap();
        assert_eq!($obj, deser);

        // Test Message Pack serialization
        let ser = rmp_serde::to_vec_named(&$obj).unwrap();
        let deser = rmp_serde::from_slice::<$obj_type>(&ser).unwrap();
        assert_eq!($obj, deser);
    };
}
