//! Gemini API 実接続テスト
//!
//! GEMINI_API_KEY が無い環境ではスキップする。

use label_audit::analyzer::{load_image, BatchEntry, Classifier, GeminiClient, PreparedBatch};
use label_audit::config::Config;
use std::time::Duration;
use tempfile::tempdir;

#[tokio::test]
async fn gemini_batch_integration() {
    let api_key = match std::env::var("GEMINI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => key,
        _ => {
            eprintln!("GEMINI_API_KEY not set; skipping integration test");
            return;
        }
    };

    let dir = tempdir().unwrap();
    let path = dir.path().join("IMG-20240101-WA0001.png");
    image::RgbImage::from_pixel(64, 64, image::Rgb([200, 30, 30]))
        .save(&path)
        .unwrap();

    let batch = PreparedBatch {
        index: 0,
        entries: vec![BatchEntry {
            file_name: "IMG-20240101-WA0001.png".into(),
            message: Some("alface estragada".into()),
            image: load_image(&path, 512).unwrap(),
        }],
    };

    let client = GeminiClient::new(&api_key, &Config::default().model, 0.1, Duration::from_secs(120))
        .expect("client build failed");
    let response = client.classify(&batch).await.expect("gemini call failed");

    assert!(response.payload.contains_key("IMG-20240101-WA0001.png"));
    assert!(response.tokens > 0);
}
