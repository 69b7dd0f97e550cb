#![no_main]
#[macro_use] extern crate libfuzzer_sys;
extern crate chrono;
extern crate hcert;
use hcert::CertificateValidator;

fuzz_target!(|data: &[u8]| {
    if let Ok(token) = std::str::from_utf8(data) {
        let _ = CertificateValidator::default().validate(token, chrono::Utc::now(), Some(data));
    }
});
