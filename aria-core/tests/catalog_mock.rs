//! Catalog clients against a mocked vendor edge: Spotify token lifecycle,
//! album pagination with ISRC back-fill, and Deezer's layered retry.

use httpmock::prelude::*;
use serde_json::json;

use aria_core::catalog::deezer::DeezerClient;
use aria_core::catalog::spotify::SpotifyClient;
use aria_core::EngineError;

fn spotify(server: &MockServer) -> SpotifyClient {
    let base = server.base_url();
    let client = SpotifyClient::with_base(
        reqwest::Client::new(),
        &format!("{base}/token"),
        &format!("{base}/v1"),
    );
    client.configure("test-id", "test-secret");
    client
}

fn spotify_track_json(id: &str, name: &str, isrc: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "duration_ms": 222_000,
        "track_number": 1,
        "disc_number": 1,
        "external_urls": {"spotify": format!("https://open.spotify.com/track/{id}")},
        "external_ids": {"isrc": isrc},
        "album": {
            "id": "alb1",
            "name": "Discovery",
            "release_date": "2001-03-07",
            "total_tracks": 14,
            "images": [{"url": "https://i.scdn.co/image/ab67616d00001e02deadbeef"}],
            "artists": [{"id": "a1", "name": "Daft Punk"}]
        },
        "artists": [{"id": "a1", "name": "Daft Punk"}]
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn spotify_without_credentials_is_an_actionable_error() {
    let server = MockServer::start();
    let base = server.base_url();
    let client = SpotifyClient::with_base(
        reqwest::Client::new(),
        &format!("{base}/token"),
        &format!("{base}/v1"),
    );

    let err = client.get_track("4iV5W9uYEdYUVa79Axb7Rh").await.unwrap_err();
    assert!(matches!(err, EngineError::NoCredentials(_)), "{err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn spotify_token_and_entity_are_cached() {
    let server = MockServer::start();
    let token_mock = server.mock(|when, then| {
        when.method(POST).path("/token");
        then.status(200)
            .json_body(json!({"access_token": "tok-1", "expires_in": 3600}));
    });
    let track_mock = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/tracks/4iV5W9uYEdYUVa79Axb7Rh")
            .header("authorization", "Bearer tok-1");
        then.status(200)
            .json_body(spotify_track_json("4iV5W9uYEdYUVa79Axb7Rh", "One More Time", "GBDUW0000059"));
    });

    let client = spotify(&server);
    let first = client.get_track("4iV5W9uYEdYUVa79Axb7Rh").await.unwrap();
    assert_eq!(first.track.name, "One More Time");
    assert_eq!(first.track.artists, "Daft Punk");
    assert_eq!(first.track.isrc, "GBDUW0000059");

    // Second call is served from the entity cache; the token is not
    // re-requested either.
    let second = client.get_track("4iV5W9uYEdYUVa79Axb7Rh").await.unwrap();
    assert_eq!(second.track.isrc, first.track.isrc);
    token_mock.assert_hits(1);
    track_mock.assert_hits(1);
}

#[tokio::test(flavor = "multi_thread")]
async fn spotify_missing_entity_maps_to_not_found() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/token");
        then.status(200)
            .json_body(json!({"access_token": "tok-1", "expires_in": 3600}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/v1/tracks/gone");
        then.status(404).json_body(json!({"error": {"status": 404}}));
    });

    let err = spotify(&server).get_track("gone").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)), "{err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn spotify_album_follows_next_page_and_backfills_isrcs() {
    let server = MockServer::start();
    let base = server.base_url();
    server.mock(|when, then| {
        when.method(POST).path("/token");
        then.status(200)
            .json_body(json!({"access_token": "tok-1", "expires_in": 3600}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/v1/albums/alb1");
        then.status(200).json_body(json!({
            "name": "Discovery",
            "release_date": "2001-03-07",
            "total_tracks": 2,
            "images": [{"url": "https://i.scdn.co/image/cover"}],
            "artists": [{"id": "a1", "name": "Daft Punk"}],
            "tracks": {
                "items": [{
                    "id": "t1",
                    "name": "One More Time",
                    "duration_ms": 320_000,
                    "track_number": 1,
                    "disc_number": 1,
                    "external_urls": {"spotify": "https://open.spotify.com/track/t1"},
                    "artists": [{"id": "a1", "name": "Daft Punk"}]
                }],
                "next": format!("{base}/v1/albums/alb1/tracks?offset=1")
            }
        }));
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/v1/albums/alb1/tracks")
            .query_param("offset", "1");
        then.status(200).json_body(json!({
            "items": [{
                "id": "t2",
                "name": "Aerodynamic",
                "duration_ms": 207_000,
                "track_number": 2,
                "disc_number": 1,
                "external_urls": {"spotify": "https://open.spotify.com/track/t2"},
                "artists": [{"id": "a1", "name": "Daft Punk"}]
            }],
            "next": null
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/v1/tracks/t1");
        then.status(200)
            .json_body(spotify_track_json("t1", "One More Time", "GBDUW0000059"));
    });
    server.mock(|when, then| {
        when.method(GET).path("/v1/tracks/t2");
        then.status(200)
            .json_body(spotify_track_json("t2", "Aerodynamic", "GBDUW0000060"));
    });

    let album = spotify(&server).get_album("alb1").await.unwrap();
    assert_eq!(album.album_info.total_tracks, 2);
    assert_eq!(album.track_list.len(), 2);
    assert_eq!(album.track_list[0].isrc, "GBDUW0000059");
    assert_eq!(album.track_list[1].isrc, "GBDUW0000060");
    assert_eq!(album.track_list[1].album_name, "Discovery");
}

#[tokio::test(flavor = "multi_thread")]
async fn spotify_isrc_search_requires_exact_match() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/token");
        then.status(200)
            .json_body(json!({"access_token": "tok-1", "expires_in": 3600}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/v1/search");
        then.status(200).json_body(json!({
            "tracks": {
                "items": [
                    spotify_track_json("near", "Cover Version", "USNEAR9900001"),
                    spotify_track_json("hit", "One More Time", "GBDUW0000059")
                ],
                "total": 2
            }
        }));
    });

    let track = spotify(&server)
        .search_by_isrc("gbduw0000059")
        .await
        .unwrap();
    assert_eq!(track.spotify_id, "hit");
    assert_eq!(track.isrc, "GBDUW0000059");
}

fn deezer_track_json(id: i64, isrc: &str) -> serde_json::Value {
    json!({
        "id": id,
        "title": "Harder, Better, Faster, Stronger",
        "duration": 224,
        "track_position": 4,
        "disk_number": 1,
        "isrc": isrc,
        "link": format!("https://www.deezer.com/track/{id}"),
        "release_date": "2001-03-07",
        "artist": {"id": 27, "name": "Daft Punk"},
        "album": {"id": 302127, "title": "Discovery", "cover_xl": "https://cdn/cover.jpg", "release_date": "2001-03-07"},
        "contributors": [{"id": 27, "name": "Daft Punk"}]
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn deezer_isrc_lookup_is_cached_for_the_process() {
    let server = MockServer::start();
    let track_mock = server.mock(|when, then| {
        when.method(GET).path("/track/3135556");
        then.status(200).json_body(deezer_track_json(3135556, "GBDUW0000059"));
    });

    let client = DeezerClient::with_base(reqwest::Client::new(), &server.base_url());
    assert_eq!(client.get_track_isrc("3135556").await.unwrap(), "GBDUW0000059");
    assert_eq!(client.get_track_isrc("3135556").await.unwrap(), "GBDUW0000059");
    track_mock.assert_hits(1);
}

#[tokio::test(flavor = "multi_thread")]
async fn deezer_retries_transient_5xx_twice_then_gives_up() {
    let server = MockServer::start();
    let flaky = server.mock(|when, then| {
        when.method(GET).path("/track/3135556");
        then.status(500).body("edge exploded");
    });

    let client = DeezerClient::with_base(reqwest::Client::new(), &server.base_url());
    let err = client.get_track("3135556").await.unwrap_err();
    assert!(matches!(err, EngineError::Transport(_)), "{err:?}");
    // Initial attempt plus the two layered retries.
    flaky.assert_hits(3);
}

#[tokio::test(flavor = "multi_thread")]
async fn deezer_does_not_retry_client_errors() {
    let server = MockServer::start();
    let rejected = server.mock(|when, then| {
        when.method(GET).path("/track/3135556");
        then.status(403).body("nope");
    });

    let client = DeezerClient::with_base(reqwest::Client::new(), &server.base_url());
    assert!(client.get_track("3135556").await.is_err());
    rejected.assert_hits(1);
}

#[tokio::test(flavor = "multi_thread")]
async fn deezer_zero_id_body_maps_to_not_found() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/track/999");
        then.status(200)
            .json_body(json!({"error": {"type": "DataException", "message": "no data", "code": 800}}));
    });

    let client = DeezerClient::with_base(reqwest::Client::new(), &server.base_url());
    let err = client.get_track("999").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)), "{err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn deezer_isrc_search_falls_back_to_track_search() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/track/isrc:GBDUW0000059");
        then.status(200).json_body(json!({"error": {"code": 800}}));
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/search/track")
            .query_param("q", "isrc:GBDUW0000059");
        then.status(200)
            .json_body(json!({"data": [deezer_track_json(3135556, "GBDUW0000059")]}));
    });

    let client = DeezerClient::with_base(reqwest::Client::new(), &server.base_url());
    let track = client.search_by_isrc("GBDUW0000059").await.unwrap();
    assert_eq!(track.isrc, "GBDUW0000059");
    assert_eq!(track.artists, "Daft Punk");
    assert_eq!(track.duration_ms, 224_000);
}
