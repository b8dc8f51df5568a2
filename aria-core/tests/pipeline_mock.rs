//! End-to-end pipeline scenarios against mocked gateways: duplicate
//! short-circuit, identifier enrichment, the fallback chain, DASH assembly
//! and pre-start cancellation.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use httpmock::prelude::*;
use regex::Regex;

use aria_core::catalog::deezer::DeezerClient;
use aria_core::delivery::amazon::AmazonAdapter;
use aria_core::delivery::qobuz::QobuzAdapter;
use aria_core::delivery::tidal::TidalAdapter;
use aria_core::delivery::youtube::YoutubeAdapter;
use aria_core::jobs;
use aria_core::library;
use aria_core::pipeline::{DownloadRequest, Pipeline};
use aria_core::resolve::{IdhsClient, SongLinkClient};
use aria_core::EngineError;

fn mock_pipeline(server: &MockServer) -> Pipeline {
    let http = reqwest::Client::new();
    let base = server.base_url();
    Pipeline {
        tidal: TidalAdapter::with_endpoints(
            http.clone(),
            &format!("{base}/tidal"),
            &format!("{base}/tidal-auth"),
            vec![format!("{base}/tidal-mirror")],
        ),
        qobuz: QobuzAdapter::with_endpoints(
            http.clone(),
            &format!("{base}/qobuz"),
            vec![format!("{base}/qobuz-dl?track_id=")],
        ),
        amazon: AmazonAdapter::with_gateways(http.clone(), vec![format!("{base}/amz")]),
        youtube: YoutubeAdapter::with_endpoints(
            http.clone(),
            &format!("{base}/spotube"),
            &format!("{base}/cobalt"),
        ),
        songlink: SongLinkClient::with_base(http.clone(), &format!("{base}/songlink")),
        idhs: IdhsClient::with_url(http.clone(), &format!("{base}/idhs")),
        deezer: DeezerClient::with_base(http.clone(), &format!("{base}/deezer")),
        download_http: http,
    }
}

/// S1: an ISRC already present in the output directory returns
/// `already_exists` without a single request leaving the process.
#[tokio::test(flavor = "multi_thread")]
async fn duplicate_hit_short_circuits_without_http() {
    let server = MockServer::start();
    let any_request = server.mock(|when, then| {
        when.path_matches(Regex::new(".*").unwrap());
        then.status(500);
    });

    let dir = tempfile::tempdir().unwrap();
    let out_dir = dir.path().to_path_buf();
    library::prebuild_index(&out_dir).unwrap();
    let existing = out_dir.join("USRC17600001.flac");
    std::fs::write(&existing, b"tagged flac bytes").unwrap();
    library::add_to_index(&out_dir, "USRC17600001", &existing);

    let pipeline = mock_pipeline(&server);
    let req = DownloadRequest {
        isrc: "USRC17600001".to_string(),
        service: "tidal".to_string(),
        output_dir: out_dir.to_string_lossy().into_owned(),
        ..Default::default()
    };

    let outcome = pipeline.download(req.clone()).await.unwrap();
    assert!(outcome.already_exists);
    assert_eq!(outcome.file_path, existing.to_string_lossy());

    // Property: back-to-back duplicate checks agree.
    let outcome2 = pipeline.download(req).await.unwrap();
    assert!(outcome2.already_exists);
    assert_eq!(outcome2.file_path, outcome.file_path);

    any_request.assert_hits(0);
    library::invalidate_index(&out_dir);
}

/// S2: a Spotify-only request picks up the Deezer ID from SongLink and the
/// ISRC from Deezer before any adapter is consulted.
#[tokio::test(flavor = "multi_thread")]
async fn identifier_enrichment_fills_deezer_and_isrc() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/songlink")
            .query_param_exists("url");
        then.status(200).json_body(serde_json::json!({
            "linksByPlatform": {
                "deezer": {"url": "https://www.deezer.com/track/3135556"},
                "tidal": {"url": "https://tidal.com/browse/track/77646170"}
            }
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/deezer/track/3135556");
        then.status(200).json_body(serde_json::json!({
            "id": 3135556,
            "title": "Harder, Better, Faster, Stronger",
            "isrc": "GBAYE0601477"
        }));
    });

    let pipeline = mock_pipeline(&server);
    let mut req = DownloadRequest {
        spotify_id: "4iV5W9uYEdYUVa79Axb7Rh".to_string(),
        ..Default::default()
    };
    let availability = pipeline.enrich_identifiers(&mut req).await.unwrap();

    assert_eq!(req.deezer_id, "3135556");
    assert_eq!(req.tidal_id, "77646170");
    assert_eq!(req.isrc, "GBAYE0601477");
    assert!(availability.tidal);
    assert!(availability.deezer);
}

/// S3: with fallback enabled every built-in is attempted in order and the
/// aggregate error names all four services.
#[tokio::test(flavor = "multi_thread")]
async fn fallback_chain_aggregates_all_provider_failures() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/tidal-mirror/track/");
        then.status(500);
    });
    server.mock(|when, then| {
        when.method(GET).path("/qobuz-dl");
        then.status(500);
    });

    let dir = tempfile::tempdir().unwrap();
    let pipeline = mock_pipeline(&server);
    let req = DownloadRequest {
        service: "tidal".to_string(),
        use_fallback: true,
        tidal_id: "77646170".to_string(),
        qobuz_id: "52727245".to_string(),
        track_name: "Song".to_string(),
        artist_name: "Artist".to_string(),
        output_dir: dir.path().to_string_lossy().into_owned(),
        ..Default::default()
    };

    let err = pipeline.download(req).await.unwrap_err();
    let EngineError::AllProvidersFailed(message) = err else {
        panic!("expected AllProvidersFailed, got {err:?}");
    };
    for service in ["tidal", "qobuz", "amazon", "youtube"] {
        assert!(message.contains(service), "missing {service} in: {message}");
    }
}

fn dash_manifest_b64(base: &str) -> String {
    let mpd = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static">
  <Period>
    <AdaptationSet contentType="audio">
      <Representation id="0" codecs="mp4a.40.2">
        <SegmentTemplate initialization="{base}/dash/init.mp4" media="{base}/dash/seg_$Number$.mp4" startNumber="1">
          <SegmentTimeline>
            <S d="9600" r="2"/>
          </SegmentTimeline>
        </SegmentTemplate>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#
    );
    B64.encode(mpd)
}

/// S4: a Tidal v2 DASH manifest with `S d=9600 r=2` yields exactly three
/// media segments assembled sequentially into one `.m4a` file.
#[tokio::test(flavor = "multi_thread")]
async fn dash_manifest_downloads_segments_into_m4a() {
    let server = MockServer::start();
    let base = server.base_url();
    server.mock(|when, then| {
        when.method(GET).path("/tidal-mirror/track/");
        then.status(200).json_body(serde_json::json!({
            "data": {
                "manifest": dash_manifest_b64(&base),
                "assetPresentation": "FULL",
                "bitDepth": 24,
                "sampleRate": 96000
            }
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/dash/init.mp4");
        then.status(200).body(b"INIT");
    });
    for i in 1..=3 {
        server.mock(|when, then| {
            when.method(GET).path(format!("/dash/seg_{i}.mp4"));
            then.status(200).body(format!("S{i}"));
        });
    }

    let dir = tempfile::tempdir().unwrap();
    let pipeline = mock_pipeline(&server);
    let req = DownloadRequest {
        service: "tidal".to_string(),
        tidal_id: "77646170".to_string(),
        track_name: "Segmented".to_string(),
        artist_name: "Artist".to_string(),
        output_dir: dir.path().to_string_lossy().into_owned(),
        ..Default::default()
    };

    let outcome = pipeline.download(req).await.unwrap();
    assert!(!outcome.already_exists);
    assert!(outcome.file_path.ends_with(".m4a"), "{}", outcome.file_path);
    assert_eq!(
        std::fs::read(&outcome.file_path).unwrap(),
        b"INITS1S2S3"
    );
}

/// S5: cancellation parked before the download call wins the race; the
/// request terminates before any outbound traffic.
#[tokio::test(flavor = "multi_thread")]
async fn cancel_before_start_issues_no_requests() {
    let server = MockServer::start();
    let any_request = server.mock(|when, then| {
        when.path_matches(Regex::new(".*").unwrap());
        then.status(200);
    });

    jobs::cancel("job-7");

    let dir = tempfile::tempdir().unwrap();
    let pipeline = mock_pipeline(&server);
    let req = DownloadRequest {
        service: "tidal".to_string(),
        tidal_id: "77646170".to_string(),
        item_id: "job-7".to_string(),
        output_dir: dir.path().to_string_lossy().into_owned(),
        ..Default::default()
    };

    let err = pipeline.download(req).await.unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    any_request.assert_hits(0);
    assert!(!jobs::is_cancelled("job-7"));
}

/// A direct-URL provider run lands the file, survives a tag-embed failure
/// and feeds the ISRC index so the next request short-circuits.
#[tokio::test(flavor = "multi_thread")]
async fn direct_download_updates_index_for_next_lookup() {
    let server = MockServer::start();
    let base = server.base_url();
    server.mock(|when, then| {
        when.method(GET).path("/qobuz-dl");
        then.status(200)
            .json_body(serde_json::json!({"url": format!("{base}/cdn/track.flac")}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/cdn/track.flac");
        then.status(200).body(b"not-actually-flac-but-bytes");
    });

    let dir = tempfile::tempdir().unwrap();
    let out_dir = dir.path().to_path_buf();
    let pipeline = mock_pipeline(&server);
    let req = DownloadRequest {
        service: "qobuz".to_string(),
        qobuz_id: "52727245".to_string(),
        isrc: "FRZ059120034".to_string(),
        track_name: "Direct".to_string(),
        artist_name: "Artist".to_string(),
        output_dir: out_dir.to_string_lossy().into_owned(),
        ..Default::default()
    };

    let outcome = pipeline.download(req.clone()).await.unwrap();
    assert!(!outcome.already_exists);
    assert_eq!(outcome.service, "qobuz");
    assert!(outcome.file_path.ends_with("Artist - Direct.flac"));
    assert_eq!(
        std::fs::read(&outcome.file_path).unwrap(),
        b"not-actually-flac-but-bytes"
    );

    // Index self-consistency: the path just written resolves by ISRC.
    let hit = library::check_isrc_exists(&out_dir, "FRZ059120034").unwrap();
    assert_eq!(hit.to_string_lossy(), outcome.file_path);

    // And the second identical request is a duplicate hit.
    let outcome2 = pipeline.download(req).await.unwrap();
    assert!(outcome2.already_exists);
    library::invalidate_index(&out_dir);
}

/// Strict mode with an unknown service is an invalid request, not a
/// fallback opportunity.
#[tokio::test(flavor = "multi_thread")]
async fn unknown_service_without_fallback_is_invalid() {
    let server = MockServer::start();
    let pipeline = mock_pipeline(&server);
    let req = DownloadRequest {
        service: "napster".to_string(),
        ..Default::default()
    };
    let err = pipeline.download(req).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
}

/// `resolve_stream` hands back the gateway URL and format without writing
/// anything to disk.
#[tokio::test(flavor = "multi_thread")]
async fn resolve_stream_returns_transient_url() {
    let server = MockServer::start();
    let base = server.base_url();
    server.mock(|when, then| {
        when.method(GET).path("/qobuz-dl");
        then.status(200)
            .json_body(serde_json::json!({"data": {"url": format!("{base}/cdn/s.flac")}}));
    });

    let pipeline = mock_pipeline(&server);
    let req = DownloadRequest {
        service: "qobuz".to_string(),
        qobuz_id: "52727245".to_string(),
        ..Default::default()
    };
    let outcome = pipeline.resolve_stream(req).await.unwrap();
    assert_eq!(outcome.service, "qobuz");
    assert!(outcome.stream_url.ends_with("/cdn/s.flac"));
    assert_eq!(outcome.format, "flac");
    assert!(!outcome.requires_decryption);
}
