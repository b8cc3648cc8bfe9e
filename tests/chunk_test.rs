use reconq::chunk::{
    ChunkError, ChunkInfo, breakdown, chunk_targets, chunk_targets_by_count, size_for_count,
};

fn letters(n: usize) -> Vec<String> {
    (b'a'..b'z')
        .take(n)
        .map(|c| (c as char).to_string())
        .collect()
}

#[test]
fn nine_targets_split_into_three_even_chunks() {
    let targets = letters(9);

    let (first, info) = chunk_targets(&targets, 3, 0).unwrap();
    assert_eq!(first, ["a", "b", "c"]);
    assert_eq!(info.unwrap().total, 3);

    let (second, _) = chunk_targets(&targets, 3, 1).unwrap();
    assert_eq!(second, ["d", "e", "f"]);

    let (third, info) = chunk_targets(&targets, 3, 2).unwrap();
    assert_eq!(third, ["g", "h", "i"]);
    assert_eq!(
        info.unwrap(),
        ChunkInfo {
            index: 2,
            size: 3,
            total: 3,
            start: 6,
            end: 9
        }
    );
}

#[test]
fn last_chunk_holds_the_remainder() {
    let targets = letters(10);

    let (last, info) = chunk_targets(&targets, 3, 3).unwrap();
    let info = info.unwrap();
    assert_eq!(last, ["j"]);
    assert_eq!(info.total, 4);
    assert_eq!(info.start, 9);
    assert_eq!(info.end, 10);
}

#[test]
fn chunks_reassemble_the_input() {
    let targets = letters(17);
    for size in 1..=18 {
        let total = targets.len().div_ceil(size);
        let mut rebuilt = Vec::new();
        for part in 0..total {
            let (chunk, info) = chunk_targets(&targets, size as i64, part as i64).unwrap();
            let info = info.unwrap();
            if part + 1 < total {
                assert_eq!(chunk.len(), size);
            } else {
                assert_eq!(chunk.len(), targets.len() - (total - 1) * size);
            }
            assert_eq!(info.end - info.start, chunk.len());
            rebuilt.extend_from_slice(chunk);
        }
        assert_eq!(rebuilt, targets, "size {size}");
    }
}

#[test]
fn non_positive_size_disables_chunking() {
    let targets = letters(5);
    for size in [0, -1, -100] {
        let (selected, info) = chunk_targets(&targets, size, 2).unwrap();
        assert_eq!(selected, targets.as_slice());
        assert!(info.is_none());
    }
}

#[test]
fn empty_input_is_returned_unchanged() {
    let targets: Vec<String> = Vec::new();
    let (selected, info) = chunk_targets(&targets, 3, 5).unwrap();
    assert!(selected.is_empty());
    assert!(info.is_none());
}

#[test]
fn negative_part_is_info_mode() {
    let targets = letters(10);
    let err = chunk_targets(&targets, 3, -1).unwrap_err();

    assert!(err.is_info());
    assert_eq!(err.to_string(), "chunk-info");
    match err {
        ChunkError::Info(info) => {
            assert_eq!(info.total, 4);
            assert_eq!(info.size, 3);
            assert_eq!(info.index, 0);
            assert_eq!(info.start, 0);
            assert_eq!(info.end, 0);
        }
        other => panic!("expected info, got {other:?}"),
    }
}

#[test]
fn part_past_the_end_is_an_error() {
    let targets = letters(9);
    let err = chunk_targets(&targets, 3, 3).unwrap_err();

    assert!(!err.is_info());
    assert!(err.to_string().contains("exceeds total chunks"));
    assert_eq!(
        err.to_string(),
        "chunk-part 3 exceeds total chunks 3 (0-indexed)"
    );
}

#[test]
fn chunk_count_derives_the_size() {
    assert_eq!(size_for_count(10, 3), 4);
    assert_eq!(size_for_count(9, 3), 3);
    assert_eq!(size_for_count(2, 5), 1);
    assert_eq!(size_for_count(10, 0), 0);
    assert_eq!(size_for_count(0, 3), 0);

    let targets = letters(10);
    let (selected, info) = chunk_targets_by_count(&targets, 3, 2).unwrap();
    assert_eq!(selected, ["i", "j"]);
    assert_eq!(info.unwrap().total, 3);
}

#[test]
fn breakdown_lists_every_chunk() {
    let chunks = breakdown(10, 3);
    assert_eq!(chunks.len(), 4);
    assert_eq!(
        chunks.iter().map(|c| (c.start, c.end)).collect::<Vec<_>>(),
        vec![(0, 3), (3, 6), (6, 9), (9, 10)]
    );
    assert!(chunks.iter().all(|c| c.total == 4 && c.size == 3));
    assert!(breakdown(10, 0).is_empty());
    assert!(breakdown(0, 3).is_empty());
}
