use docqa_retrieval::streaming::{ResultStreamer, StreamingConfig};
use tokio_stream::StreamExt;

fn streamer(chunk_size: usize) -> ResultStreamer {
    ResultStreamer::new(StreamingConfig {
        chunk_size,
        buffer_max_size: 2,
        ..StreamingConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_record_count_and_order_for_any_chunk_size() {
    for n in [0usize, 1, 6, 7, 30] {
        for chunk_size in [1, 3, 7, 50] {
            let records: Vec<usize> = streamer(chunk_size)
                .stream_results((0..n).collect::<Vec<usize>>(), None)
                .unwrap()
                .map(|r| r.unwrap().record)
                .collect()
                .await;
            assert_eq!(records, (0..n).collect::<Vec<_>>(), "n={n} c={chunk_size}");

            let chunks: Vec<_> = streamer(chunk_size)
                .stream_chunks((0..n).collect::<Vec<_>>(), None)
                .unwrap()
                .map(|c| c.unwrap())
                .collect()
                .await;
            assert_eq!(chunks.iter().filter(|c| c.is_last).count(), 1);
            assert!(chunks.last().unwrap().is_last);
        }
    }
}

#[tokio::test]
async fn test_seven_records_in_chunks_of_three() {
    let chunks: Vec<_> = streamer(3)
        .stream_chunks(vec!["a", "b", "c", "d", "e", "f", "g"], None)
        .unwrap()
        .map(|c| c.unwrap())
        .collect()
        .await;

    let sizes: Vec<usize> = chunks.iter().map(|c| c.data.len()).collect();
    assert_eq!(sizes, vec![3, 3, 1]);
    assert!(chunks.iter().all(|c| c.total_chunks == Some(3)));
    let flags: Vec<bool> = chunks.iter().map(|c| c.is_last).collect();
    assert_eq!(flags, vec![false, false, true]);
}

#[tokio::test]
async fn test_metadata_points_back_to_chunks() {
    let records: Vec<_> = streamer(4)
        .stream_results((0..10).collect::<Vec<u32>>(), None)
        .unwrap()
        .map(|r| r.unwrap())
        .collect()
        .await;

    let chunk_of: Vec<usize> = records.iter().map(|r| r.stream.chunk_index).collect();
    assert_eq!(chunk_of, vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2]);
    assert!(records.iter().all(|r| r.stream.total_chunks == Some(3)));
    let positions: Vec<usize> = records.iter().map(|r| r.stream.position).collect();
    assert_eq!(positions, (0..10).collect::<Vec<_>>());
}
