// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use sensor_reader::endpoint::{BusUrl, StoreAddress};

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = BusUrl::parse(text);
        let _ = StoreAddress::parse(text);
    }
});
