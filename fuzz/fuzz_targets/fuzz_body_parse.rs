#![no_main]

//! Body parsing and field normalization must not panic on any input.

use arbitrary::Arbitrary;
use edgeward::telemetry::{ParsedBody, classify};
use edgeward::telemetry::fields::{mask_account, normalize_amount};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    content_type: &'a str,
    query: &'a str,
    body: &'a [u8],
    amount: &'a str,
}

fuzz_target!(|input: Input<'_>| {
    let parsed = ParsedBody::parse(input.content_type, input.body);
    let _ = classify(&parsed, input.query);
    let _ = parsed.to_value();

    let _ = normalize_amount(input.amount);
    let masked = mask_account(input.amount);
    assert!(masked.len() <= input.amount.len() + 4);
});
