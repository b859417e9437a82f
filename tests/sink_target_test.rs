use listen_sync::sink::{JsonDirSink, SqliteSink};
use listen_sync::types::format_timestamp_ms;
use listen_sync::{Batch, EventSink, PlayEvent, SinkTarget};

fn batch(ids: &[(&str, i64)]) -> Batch {
    Batch {
        events: ids
            .iter()
            .map(|(id, ms)| PlayEvent {
                track_id: id.to_string(),
                artist_id: "a1".to_string(),
                track_name: format!("Track {id}"),
                artist_name: "Artist".to_string(),
                played_at: format_timestamp_ms(*ms),
                played_at_ms: *ms,
            })
            .collect(),
    }
}

#[test_log::test(tokio::test)]
async fn test_json_connection_string_writes_directory() {
    let dir = tempfile::tempdir().unwrap();
    let target = SinkTarget::parse(&format!("json://{}", dir.path().join("raw").display())).unwrap();

    let sink = target.connect().await.unwrap();
    sink.append_events(&batch(&[("t1", 1_000), ("t2", 2_000)])).await.unwrap();
    sink.append_events(&batch(&[("t2", 2_000)])).await.unwrap();

    let stored = JsonDirSink::new(dir.path().join("raw")).unwrap().events().unwrap();
    assert_eq!(stored.len(), 2);
}

#[test_log::test(tokio::test)]
async fn test_sqlite_connection_string_creates_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("warehouse/listens.db");
    let url = format!("sqlite://{}", path.display());

    let sink = SinkTarget::parse(&url).unwrap().connect().await.unwrap();
    sink.append_events(&batch(&[("t1", 1_000)])).await.unwrap();
    drop(sink);

    let reopened = SqliteSink::connect(&url).await.unwrap();
    assert_eq!(reopened.count_events().await.unwrap(), 1);
}
