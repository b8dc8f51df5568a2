//! Lyrics providers against mocked endpoints: the LRCLIB strategy chain and
//! the Musixmatch proxy's dual sync/unsync payload.

use httpmock::prelude::*;
use serde_json::json;

use aria_core::lyrics::providers::lrclib::LrclibClient;
use aria_core::lyrics::providers::musixmatch::MusixmatchClient;
use aria_core::lyrics::SyncType;

const SYNCED: &str = "[00:12.00]One more time\n[00:15.50]We're gonna celebrate\n";

#[tokio::test(flavor = "multi_thread")]
async fn lrclib_direct_hit_returns_line_synced() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/get")
            .query_param("artist_name", "Daft Punk")
            .query_param("track_name", "One More Time");
        then.status(200).json_body(json!({
            "instrumental": false,
            "plainLyrics": "One more time\nWe're gonna celebrate",
            "syncedLyrics": SYNCED,
            "duration": 320.0
        }));
    });

    let client = LrclibClient::with_base(reqwest::Client::new(), &server.base_url());
    let resp = client
        .fetch("Daft Punk", "Daft Punk", "One More Time", "One More Time", 320.0)
        .await
        .unwrap();
    assert_eq!(resp.sync_type, SyncType::LineSynced);
    assert_eq!(resp.provider, "LRCLIB");
    assert_eq!(resp.lines.len(), 2);
    assert_eq!(resp.lines[0].start_time_ms, 12_000);
    assert_eq!(resp.lines[0].words, "One more time");
    // End of a line is the start of the next.
    assert_eq!(resp.lines[0].end_time_ms, 15_500);
}

#[tokio::test(flavor = "multi_thread")]
async fn lrclib_falls_back_to_simplified_title() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/get")
            .query_param("track_name", "One More Time - 2001 Remaster");
        then.status(404);
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/get")
            .query_param("track_name", "One More Time");
        then.status(200).json_body(json!({
            "instrumental": false,
            "syncedLyrics": SYNCED,
            "duration": 320.0
        }));
    });

    let client = LrclibClient::with_base(reqwest::Client::new(), &server.base_url());
    let resp = client
        .fetch(
            "Daft Punk",
            "Daft Punk",
            "One More Time - 2001 Remaster",
            "One More Time",
            320.0,
        )
        .await
        .unwrap();
    assert_eq!(resp.source, "LRCLIB (simplified)");
    assert_eq!(resp.sync_type, SyncType::LineSynced);
}

#[tokio::test(flavor = "multi_thread")]
async fn lrclib_search_prefers_synced_within_duration_window() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/get");
        then.status(404);
    });
    server.mock(|when, then| {
        when.method(GET).path("/search");
        then.status(200).json_body(json!([
            {"instrumental": false, "plainLyrics": "plain only", "syncedLyrics": "", "duration": 321.0},
            {"instrumental": false, "plainLyrics": "", "syncedLyrics": SYNCED, "duration": 318.0},
            {"instrumental": false, "plainLyrics": "", "syncedLyrics": SYNCED, "duration": 95.0}
        ]));
    });

    let client = LrclibClient::with_base(reqwest::Client::new(), &server.base_url());
    let resp = client
        .fetch("Daft Punk", "Daft Punk", "One More Time", "One More Time", 320.0)
        .await
        .unwrap();
    assert_eq!(resp.source, "LRCLIB Search");
    assert_eq!(resp.sync_type, SyncType::LineSynced);
    assert_eq!(resp.lines.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn lrclib_instrumental_flag_short_circuits() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/get");
        then.status(200).json_body(json!({"instrumental": true, "duration": 200.0}));
    });

    let client = LrclibClient::with_base(reqwest::Client::new(), &server.base_url());
    let resp = client
        .fetch("Artist", "Artist", "Interlude", "Interlude", 200.0)
        .await
        .unwrap();
    assert_eq!(resp.sync_type, SyncType::Instrumental);
    assert!(resp.instrumental);
    assert!(resp.lines.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn musixmatch_prefers_synced_over_unsynced() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/v2/full")
            .query_param("artist", "Daft Punk")
            .query_param("track", "One More Time");
        then.status(200).json_body(json!({
            "id": 42,
            "syncedLyrics": {"lyrics": SYNCED},
            "unsyncedLyrics": {"lyrics": "One more time\nWe're gonna celebrate"}
        }));
    });

    let client = MusixmatchClient::with_base(reqwest::Client::new(), &server.base_url());
    let resp = client
        .fetch_lyrics("One More Time", "Daft Punk", "")
        .await
        .unwrap();
    assert_eq!(resp.provider, "Musixmatch");
    assert_eq!(resp.sync_type, SyncType::LineSynced);
    assert_eq!(resp.lines[1].words, "We're gonna celebrate");
}

#[tokio::test(flavor = "multi_thread")]
async fn musixmatch_language_override_issues_followup() {
    let server = MockServer::start();
    let base_call = server.mock(|when, then| {
        when.method(GET).path("/v2/full").query_param_exists("artist");
        then.status(200).json_body(json!({
            "id": 42,
            "syncedLyrics": {"lyrics": SYNCED}
        }));
    });
    let lang_call = server.mock(|when, then| {
        when.method(GET)
            .path("/v2/full")
            .query_param("id", "42")
            .query_param("lang", "es");
        then.status(200).json_body(json!({
            "id": 42,
            "syncedLyrics": {"lyrics": "[00:12.00]Una vez más\n"}
        }));
    });

    let client = MusixmatchClient::with_base(reqwest::Client::new(), &server.base_url());
    let resp = client
        .fetch_lyrics("One More Time", "Daft Punk", "es")
        .await
        .unwrap();
    assert_eq!(resp.source, "Musixmatch (es)");
    assert_eq!(resp.lines[0].words, "Una vez más");
    base_call.assert_hits(1);
    lang_call.assert_hits(1);
}

#[tokio::test(flavor = "multi_thread")]
async fn musixmatch_empty_payloads_are_not_found() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v2/full");
        then.status(200).json_body(json!({"id": 0}));
    });

    let client = MusixmatchClient::with_base(reqwest::Client::new(), &server.base_url());
    assert!(client
        .fetch_lyrics("Nothing", "Nobody", "")
        .await
        .is_err());
}
