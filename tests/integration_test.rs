//! Integration tests for squall

mod common;

use squall::{ExportOptions, ExportOutcome, Exporter, StorageProvider};
use std::collections::HashMap;
use std::sync::Arc;

use common::{KIB, expected_csv, gunzip, small_policy, source};

async fn memory_provider(url: &str) -> Arc<StorageProvider> {
    Arc::new(
        StorageProvider::for_url_with_options(url, HashMap::new())
            .await
            .unwrap(),
    )
}

/// One uploader keeps parts reaching the in-memory store in order.
/// Out-of-order completion is covered by the failure tests.
fn multipart_options() -> ExportOptions {
    ExportOptions::default()
        .with_part_policy(small_policy())
        .with_flush_size(4 * KIB)
        .with_compression_level(0)
        .with_workers(1)
}

mod multipart_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_multipart_round_trip_is_byte_exact() {
        let provider = memory_provider("memory://exports/orders.csv.gz").await;
        let exporter = Exporter::new(multipart_options());

        let stats = exporter
            .upload(source(20_000), provider.clone())
            .await
            .unwrap();

        assert_eq!(stats.rows, 20_000);
        assert!(stats.parts > 5, "expected several parts, got {}", stats.parts);
        assert_eq!(
            stats.outcome,
            ExportOutcome::Completed {
                location: "memory://exports/orders.csv.gz".to_string()
            }
        );

        let object = provider.get().await.unwrap();
        assert_eq!(object.len() as u64, stats.compressed_bytes);
        assert_eq!(gunzip(&object), expected_csv(20_000));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_compressed_round_trip() {
        let provider = memory_provider("memory://exports/compressed.csv.gz").await;
        let options = multipart_options().with_compression_level(6);

        let stats = Exporter::new(options)
            .upload(source(50_000), provider.clone())
            .await
            .unwrap();

        assert!(matches!(stats.outcome, ExportOutcome::Completed { .. }));
        let object = provider.get().await.unwrap();
        assert_eq!(gunzip(&object), expected_csv(50_000));
    }

    #[tokio::test]
    async fn test_small_output_uses_direct_put() {
        let provider = memory_provider("memory://exports/small.csv.gz").await;

        let stats = Exporter::new(ExportOptions::default())
            .upload(source(10), provider.clone())
            .await
            .unwrap();

        assert_eq!(stats.rows, 10);
        assert_eq!(stats.parts, 0);
        assert_eq!(stats.outcome, ExportOutcome::DirectPut);
        assert_eq!(gunzip(&provider.get().await.unwrap()), expected_csv(10));
    }

    #[tokio::test]
    async fn test_header_only_export() {
        let provider = memory_provider("memory://exports/empty.csv.gz").await;

        let stats = Exporter::new(ExportOptions::default())
            .upload(source(0), provider.clone())
            .await
            .unwrap();

        assert_eq!(stats.rows, 0);
        assert_eq!(stats.outcome, ExportOutcome::DirectPut);
        assert_eq!(
            gunzip(&provider.get().await.unwrap()),
            "id,name,amount\n"
        );
    }

    #[tokio::test]
    async fn test_local_backend_cannot_start_multipart() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("{}/out.csv.gz", dir.path().display());
        let provider = memory_provider(&url).await;

        let err = Exporter::new(ExportOptions::default())
            .upload(source(10), provider)
            .await
            .unwrap_err();
        assert!(matches!(err, squall::error::ExportError::Initiate { .. }));
    }
}

mod local_tests {
    use super::*;
    use squall::{Cancellation, Config, DelimitedSource, run_export};
    use std::io::Write;

    #[tokio::test]
    async fn test_run_export_to_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exports").join("orders.csv.gz");
        let config = Config::for_destination(path.to_string_lossy());

        let stats = run_export(&config, source(1_000), Cancellation::new())
            .await
            .unwrap();

        assert_eq!(stats.rows, 1_000);
        assert_eq!(stats.outcome, ExportOutcome::Written);
        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len() as u64, stats.compressed_bytes);
        assert_eq!(gunzip(&written), expected_csv(1_000));
    }

    #[tokio::test]
    async fn test_delimited_input_with_output_options() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.tsv");
        let mut file = std::fs::File::create(&input).unwrap();
        writeln!(file, "id\tname").unwrap();
        writeln!(file, "1\talice").unwrap();
        writeln!(file, "2\tbob; jr").unwrap();
        drop(file);

        let output = dir.path().join("out.csv.gz");
        let mut config = Config::for_destination(output.to_string_lossy());
        config.csv.delimiter = ';';
        config.csv.headers = Some(vec!["ID".to_string(), "NAME".to_string()]);

        let source = DelimitedSource::open(&input, b'\t', true).unwrap();
        let stats = run_export(&config, source, Cancellation::new())
            .await
            .unwrap();

        assert_eq!(stats.rows, 2);
        assert_eq!(
            gunzip(&std::fs::read(&output).unwrap()),
            "ID;NAME\n1;alice\n2;\"bob; jr\"\n"
        );
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv.gz");
        let mut config = Config::for_destination(path.to_string_lossy());
        config.upload.part_size_mb = 1;

        let err = run_export(&config, source(1), Cancellation::new())
            .await
            .unwrap_err();
        assert!(matches!(err, squall::error::ExportError::Config { .. }));
        assert!(!path.exists());
    }
}
