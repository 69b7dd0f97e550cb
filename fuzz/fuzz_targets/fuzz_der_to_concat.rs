#![no_main]
#[macro_use] extern crate libfuzzer_sys;
extern crate hcert;
use hcert::transcode::{concat_to_der, der_to_concat};

fuzz_target!(|data: &[u8]| {
    if let Ok(concat) = der_to_concat(data, 32) {
        assert_eq!(concat.len(), 64);
        let der = concat_to_der(&concat, 32).unwrap();
        assert_eq!(der_to_concat(&der, 32).unwrap(), concat);
    }
});
