#![no_main]

//! Injection output must not depend on how the document is chunked, and the
//! injector never holds back more than a partial end tag.

use bytes::Bytes;
use edgeward::inject::HeadInjector;
use libfuzzer_sys::fuzz_target;

fn run(doc: &[u8], cuts: &[usize]) -> Vec<u8> {
    let mut injector = HeadInjector::new("x");
    let mut out = Vec::new();
    let mut start = 0;
    for &cut in cuts {
        let end = cut.clamp(start, doc.len());
        out.extend_from_slice(&injector.push(Bytes::copy_from_slice(&doc[start..end])));
        assert!(injector.held() <= 6);
        start = end;
    }
    out.extend_from_slice(&injector.push(Bytes::copy_from_slice(&doc[start..])));
    out.extend_from_slice(&injector.finish());
    out
}

fuzz_target!(|input: (Vec<u8>, Vec<u8>)| {
    let (doc, raw_cuts) = input;
    let mut cuts: Vec<usize> = raw_cuts.iter().map(|c| *c as usize).collect();
    cuts.sort_unstable();

    let whole = run(&doc, &[]);
    let chunked = run(&doc, &cuts);
    assert_eq!(whole, chunked);
});
