//! Fuzz target for commit and table decoding.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tably_storage::{Commit, Table};

fuzz_target!(|data: &[u8]| {
    if let Ok(commit) = Commit::decode(data) {
        let _ = commit.sum();
    }
    if let Ok(table) = Table::decode(data) {
        let _ = table.sum();
    }
});
