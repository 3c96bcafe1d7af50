// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use sensor_reader::command::AppCommand;
use sensor_reader::parser::{parse_payload_bytes, render_sample, Sample};

fuzz_target!(|data: &[u8]| {
    // Raw sensor payloads
    if let Ok(values) = parse_payload_bytes(data) {
        let len = values.len();
        if let Ok(sample) = Sample::with_len(values.clone(), len) {
            let rendered = render_sample(Some(&sample));
            assert_eq!(parse_payload_bytes(rendered.as_bytes()).ok(), Some(values));
        }
    }

    // Command payloads
    let _ = AppCommand::decode(data);
});
