// Property tests for the block copier
//
// Output length is always a positive multiple of the block size and never
// short of the requested transfer size, whatever the input length.

use proptest::prelude::*;
use schedbench::config::{OutputSuffix, TransferConfig};
use schedbench::pool::WorkerId;
use schedbench::workload::{copy_blocks, TransferError, TransferWorkload};
use std::io::Cursor;
use std::path::Path;
use tempfile::TempDir;

fn sizes() -> impl Strategy<Value = (usize, u64, usize)> {
    // (block, blocks in transfer, input length)
    (1usize..=512, 1u64..=16, 1usize..=4096)
}

proptest! {
    #[test]
    fn prop_output_is_block_multiple_and_long_enough((block, blocks, input_len) in sizes()) {
        let transfer = block as u64 * blocks;
        let input: Vec<u8> = (0..input_len).map(|i| i as u8).collect();
        let mut reader = Cursor::new(input);
        let mut out = Vec::new();
        let mut buffer = vec![0; block];

        let (input_path, output_path) = (Path::new("in"), Path::new("out"));
        let result =
            copy_blocks(&mut reader, &mut out, &mut buffer, transfer, input_path, output_path);

        if input_len < block {
            let is_exhausted = matches!(result, Err(TransferError::InputExhausted { .. }));
            prop_assert!(is_exhausted);
            prop_assert!(out.is_empty());
        } else {
            let state = result.unwrap();
            prop_assert!(!out.is_empty());
            prop_assert_eq!(out.len() % block, 0);
            prop_assert!(out.len() as u64 >= transfer);
            prop_assert_eq!(state.bytes_written, out.len() as u64);
            prop_assert_eq!(state.write_count * block as u64, state.bytes_written);
        }
    }

    #[test]
    fn prop_output_repeats_whole_input_blocks((block, blocks, input_len) in sizes()) {
        prop_assume!(input_len >= block);
        let transfer = block as u64 * blocks;
        let input: Vec<u8> = (0..input_len).map(|i| (i * 7) as u8).collect();
        let mut reader = Cursor::new(input.clone());
        let mut out = Vec::new();
        let mut buffer = vec![0; block];

        let (input_path, output_path) = (Path::new("in"), Path::new("out"));
        copy_blocks(&mut reader, &mut out, &mut buffer, transfer, input_path, output_path)
            .unwrap();

        let usable = input_len / block * block;
        for (i, chunk) in out.chunks(block).enumerate() {
            let offset = (i * block) % usable;
            prop_assert_eq!(chunk, &input[offset..offset + block]);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_file_transfer_is_idempotent(blocks in 1u64..=8, input_len in 256usize..=2048) {
        let dir = TempDir::new().unwrap();
        let input: Vec<u8> = (0..input_len).map(|i| (i % 253) as u8).collect();
        std::fs::write(dir.path().join("rwinput-1"), &input).unwrap();

        let (input_base, output_base) = (dir.path().join("rwinput"), dir.path().join("rwoutput"));
        let config = TransferConfig::new(256 * blocks, 256, input_base, output_base)
            .unwrap()
            .with_output_suffix(OutputSuffix::WorkerId);
        let id = WorkerId::new(1).unwrap();

        let mut transfer = TransferWorkload::new(config);
        let first_state = transfer.run(id).unwrap();
        let first = std::fs::read(dir.path().join("rwoutput-1")).unwrap();
        let second_state = transfer.run(id).unwrap();
        let second = std::fs::read(dir.path().join("rwoutput-1")).unwrap();

        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first_state, second_state);
        prop_assert_eq!(first.len() as u64 % 256, 0);
    }
}
