#![no_main]

// Loading never panics, and a loaded catalog survives its own JSON form.

use faultline_core::catalog::FaultCatalog;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|text: &str| {
    if let Ok(catalog) = FaultCatalog::from_json_str(text) {
        let reloaded = FaultCatalog::from_json_value(&catalog.to_json()).expect("serialized catalog must reload");
        assert_eq!(reloaded.entries().len(), catalog.entries().len());
        for (a, b) in catalog.entries().iter().zip(reloaded.entries()) {
            assert_eq!(a.name(), b.name());
            assert_eq!(a.pattern(), b.pattern());
        }
        let _ = serde_json::to_string(&catalog.to_json());
    }
});
