use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::Client;

use crate::error::EngineError;
use crate::http;
use crate::jobs;
use crate::logbuf;

use super::output::OutputTarget;

const WRITE_BUFFER: usize = 256 * 1024;

fn check_cancelled(item_id: &str) -> Result<(), EngineError> {
    if jobs::is_cancelled(item_id) {
        return Err(EngineError::Cancelled);
    }
    Ok(())
}

/// Streaming copy of one direct URL into the output target, with
/// write-through progress and cooperative cancellation. A server-declared
/// Content-Length is authoritative: a byte-count mismatch fails the
/// download and removes the partial file.
pub async fn download_direct(
    client: &Client,
    url: &str,
    target: &OutputTarget,
    item_id: &str,
) -> Result<u64, EngineError> {
    check_cancelled(item_id)?;

    let resp = client
        .get(url)
        .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent())
        .send()
        .await
        .map_err(|err| {
            if jobs::is_cancelled(item_id) {
                EngineError::Cancelled
            } else {
                EngineError::Http(err)
            }
        })?;

    if !resp.status().is_success() {
        return Err(EngineError::Transport(format!(
            "download failed: HTTP {}",
            resp.status().as_u16()
        )));
    }

    let expected = resp.content_length().unwrap_or(0);
    if expected > 0 && !item_id.is_empty() {
        jobs::set_item_total(item_id, expected as i64);
    }

    let file = target.open_for_write()?;
    let mut writer = jobs::ProgressWriter::new(BufWriter::with_capacity(WRITE_BUFFER, file), item_id);

    let mut stream = resp.bytes_stream();
    let result: Result<u64, EngineError> = async {
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            check_cancelled(item_id)?;
            let chunk = chunk.map_err(EngineError::Http)?;
            writer.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
        writer.flush()?;
        Ok(written)
    }
    .await;

    let written = match result {
        Ok(n) => n,
        Err(err) => {
            target.cleanup_on_error();
            if jobs::is_cancelled(item_id) {
                return Err(EngineError::Cancelled);
            }
            return Err(err);
        }
    };

    if expected > 0 && written != expected {
        target.cleanup_on_error();
        return Err(EngineError::IncompleteDownload { expected, written });
    }

    Ok(written)
}

async fn append_segment(
    client: &Client,
    url: &str,
    writer: &mut impl Write,
    item_id: &str,
) -> Result<u64, EngineError> {
    check_cancelled(item_id)?;

    let resp = client
        .get(url)
        .header(reqwest::header::USER_AGENT, http::random_desktop_user_agent())
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(EngineError::Transport(format!(
            "segment download failed with status {}",
            resp.status().as_u16()
        )));
    }

    let mut stream = resp.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        check_cancelled(item_id)?;
        let chunk = chunk.map_err(EngineError::Http)?;
        writer.write_all(&chunk)?;
        written += chunk.len() as u64;
    }
    Ok(written)
}

/// Assemble a DASH stream: init segment plus every media segment, written
/// sequentially into one temp file, renamed into place on success. The final
/// container is fMP4, so the output carries an `.m4a` extension regardless
/// of what the request asked for.
pub async fn download_dash(
    client: &Client,
    init_url: &str,
    media_urls: &[String],
    out_path: &Path,
    item_id: &str,
) -> Result<PathBuf, EngineError> {
    let m4a_path = if out_path.extension().and_then(|e| e.to_str()) == Some("m4a") {
        out_path.to_path_buf()
    } else {
        out_path.with_extension("m4a")
    };
    logbuf::debug(
        "Executor",
        format!("DASH: {} segments into {}", media_urls.len(), m4a_path.display()),
    );

    if let Some(parent) = m4a_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp_path = m4a_path.with_extension("m4a.part");

    let result: Result<(), EngineError> = async {
        let file = std::fs::File::create(&tmp_path)?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER, file);

        let mut received = append_segment(client, init_url, &mut writer, item_id).await? as i64;

        let total = media_urls.len();
        for (i, media_url) in media_urls.iter().enumerate() {
            received += append_segment(client, media_url, &mut writer, item_id).await? as i64;
            // Total bytes are unknown in advance for segmented streams, so
            // the fraction tracks completed segments while the byte counter
            // reports what actually landed.
            if !item_id.is_empty() {
                jobs::set_item_progress(item_id, (i + 1) as f64 / total as f64, received, 0);
            }
        }
        writer.flush()?;
        Ok(())
    }
    .await;

    if let Err(err) = result {
        let _ = std::fs::remove_file(&tmp_path);
        if jobs::is_cancelled(item_id) {
            return Err(EngineError::Cancelled);
        }
        return Err(err);
    }

    if m4a_path.exists() {
        let _ = std::fs::remove_file(&m4a_path);
    }
    std::fs::rename(&tmp_path, &m4a_path)?;
    Ok(m4a_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn direct_download_writes_file_and_checks_length() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/track.flac");
            then.status(200).body(b"flac-bytes-here");
        });

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("track.flac");
        let client = reqwest::Client::new();
        let target = OutputTarget::Path(out.clone());

        let written = download_direct(
            &client,
            &format!("{}/track.flac", server.base_url()),
            &target,
            "",
        )
        .await
        .unwrap();
        assert_eq!(written, 15);
        assert_eq!(std::fs::read(&out).unwrap(), b"flac-bytes-here");
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_request() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/never.flac");
            then.status(200).body(b"x");
        });

        crate::jobs::cancel("exec-cancel-1");
        let dir = tempfile::tempdir().unwrap();
        let target = OutputTarget::Path(dir.path().join("never.flac"));
        let client = reqwest::Client::new();

        let err = download_direct(
            &client,
            &format!("{}/never.flac", server.base_url()),
            &target,
            "exec-cancel-1",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        mock.assert_hits(0);
        crate::jobs::clear_cancel("exec-cancel-1");
    }

    #[tokio::test]
    async fn dash_assembles_segments_in_order() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/init.mp4");
            then.status(200).body(b"INIT");
        });
        for i in 1..=3 {
            server.mock(|when, then| {
                when.method(GET).path(format!("/seg_{i}.mp4"));
                then.status(200).body(format!("S{i}"));
            });
        }

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("track.flac");
        let client = reqwest::Client::new();
        let media: Vec<String> = (1..=3)
            .map(|i| format!("{}/seg_{i}.mp4", server.base_url()))
            .collect();

        let final_path = download_dash(
            &client,
            &format!("{}/init.mp4", server.base_url()),
            &media,
            &out,
            "",
        )
        .await
        .unwrap();

        assert_eq!(final_path.extension().unwrap(), "m4a");
        assert_eq!(std::fs::read(&final_path).unwrap(), b"INITS1S2S3");
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn failed_segment_cleans_partial_file() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/init.mp4");
            then.status(200).body(b"INIT");
        });
        server.mock(|when, then| {
            when.method(GET).path("/seg_1.mp4");
            then.status(500);
        });

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("track.m4a");
        let client = reqwest::Client::new();

        let err = download_dash(
            &client,
            &format!("{}/init.mp4", server.base_url()),
            &[format!("{}/seg_1.mp4", server.base_url())],
            &out,
            "",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Transport(_)));
        assert!(!out.exists());
        assert!(!out.with_extension("m4a.part").exists());
    }
}
