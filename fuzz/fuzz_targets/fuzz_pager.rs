//! Fuzz target: `RxPager`
//!
//! Interprets the input as a program of ingest/publish/pop/block/skip
//! operations over a small ring and checks cursor ordering and byte
//! order after every step.
//!
//! cargo fuzz run fuzz_pager

#![no_main]

use std::collections::VecDeque;

use libfuzzer_sys::fuzz_target;
use ltem::pager::RxPager;

const RING: usize = 32;

fuzz_target!(|data: &[u8]| {
    let mut pager: RxPager<RING> = RxPager::new(2);
    // Every byte ever accepted, in order, minus what has been consumed.
    let mut fifo: VecDeque<u8> = VecDeque::new();
    let mut now = 0u32;

    let mut ops = data.chunks(2);
    while let Some(&[op, arg]) = ops.next() {
        let n = usize::from(arg) % (RING + 8);
        match op % 6 {
            0 => {
                let chunk: Vec<u8> = (0..n).map(|i| arg.wrapping_add(i as u8)).collect();
                let accepted = pager.ingest(&chunk, now);
                fifo.extend(&chunk[..accepted]);
            }
            1 => pager.publish(),
            2 => {
                now = now.wrapping_add(u32::from(arg));
                pager.service(now);
            }
            3 => {
                let mut out = vec![0u8; n];
                let got = pager.pop(&mut out);
                for &b in &out[..got] {
                    assert_eq!(Some(b), fifo.pop_front());
                }
            }
            4 => {
                let block = pager.pop_block(n);
                let len = block.len();
                for (i, &b) in block.data().iter().enumerate() {
                    assert_eq!(Some(&b), fifo.get(i));
                }
                if arg & 1 == 1 {
                    assert_eq!(block.commit(), len);
                    fifo.drain(..len);
                }
            }
            _ => {
                let view = pager.view().to_vec();
                for (i, &b) in view.iter().enumerate() {
                    assert_eq!(Some(&b), fifo.get(i));
                }
                let skipped = pager.skip_tail(n);
                fifo.drain(..skipped);
            }
        }

        assert!(pager.tail() <= pager.published());
        assert!(pager.published() <= pager.head());
        assert_eq!(pager.occupied() + pager.unpublished(), fifo.len());
    }
});
