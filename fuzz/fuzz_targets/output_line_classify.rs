#![no_main]

use argus_supervisor::{CustomPatterns, ErrorClassifier, LineOrigin, OutputStream};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let mut context = Vec::new();
    for line in raw.lines() {
        context.push(line.to_string());
        let origin = LineOrigin {
            pid: 1,
            command: "fuzz",
            source: OutputStream::Stderr,
        };
        let Some(error) = ErrorClassifier::builtin().classify_output_line(
            line,
            origin,
            &context,
            &CustomPatterns::default(),
            0,
        ) else {
            continue;
        };
        assert_eq!(error.message, line);
        assert!(error.context.len() <= argus_supervisor::classifier::CONTEXT_WINDOW_LINES);
        serde_json::to_string(&error).expect("stream errors always serialize");
    }
});
