#![no_main]
#[macro_use] extern crate libfuzzer_sys;
extern crate hcert;
use hcert::EnvelopeBuilder;

fuzz_target!(|data: &[u8]| {
    let _ = EnvelopeBuilder::default().parse_envelope(data);
});
