// tests/integration/lifecycle_test.rs

//! End-to-end scenarios from spec.md §8, run against a real (local)
//! WebSocket RCON endpoint rather than a stub client.

use chrono::{Duration as ChronoDuration, Utc};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use rustpm_controller::core::model::{Vip, WipeKind};
use rustpm_controller::core::ControllerError;

use super::test_helpers::{create_server_input, fixture, MockRconServer};

fn map_wipe_regex() -> Regex {
    Regex::new(r"proceduralmap.*\| xargs rm").unwrap()
}

fn blueprint_wipe_regex() -> Regex {
    Regex::new(r"player\.blueprints.*\| xargs rm").unwrap()
}

/// Scenarios 1-4: a dormant server's pending (or already-applied) wipe
/// and VIP set shape the rendered user-data exactly as spec.md §8
/// requires, and only a still-pending wipe gets stamped as applied.
#[tokio::test]
async fn start_server_scenarios() {
    let _rcon = MockRconServer::spawn().await;

    // Scenario 1: pending map-wipe.
    {
        let f = fixture();
        let dormant = f.controller.create_server(create_server_input()).await.unwrap();
        let id = dormant.server.id;
        let wipe = rustpm_controller::core::model::Wipe {
            id: Uuid::new_v4(),
            server_id: id,
            kind: WipeKind::Map,
            seed: 1,
            salt: 2,
            created_at: Utc::now(),
            applied_at: None,
        };
        f.store.create_wipe(id, wipe).await.unwrap();

        f.controller.start_server(CancellationToken::new(), id).await.unwrap();

        let user_data = f.instances.last_user_data().await;
        assert!(map_wipe_regex().is_match(&user_data));
        assert!(!blueprint_wipe_regex().is_match(&user_data));

        let server = f.store.get_server(id).await.unwrap();
        assert!(server.current_wipe().unwrap().applied_at.is_some());
    }

    // Scenario 2: pending full-wipe.
    {
        let f = fixture();
        let dormant = f.controller.create_server(create_server_input()).await.unwrap();
        let id = dormant.server.id;
        let wipe = rustpm_controller::core::model::Wipe {
            id: Uuid::new_v4(),
            server_id: id,
            kind: WipeKind::Full,
            seed: 1,
            salt: 2,
            created_at: Utc::now(),
            applied_at: None,
        };
        f.store.create_wipe(id, wipe).await.unwrap();

        f.controller.start_server(CancellationToken::new(), id).await.unwrap();

        let user_data = f.instances.last_user_data().await;
        assert!(map_wipe_regex().is_match(&user_data));
        assert!(blueprint_wipe_regex().is_match(&user_data));

        let server = f.store.get_server(id).await.unwrap();
        assert!(server.current_wipe().unwrap().applied_at.is_some());
    }

    // Scenario 3: wipe already applied 23 hours ago; StartServer must not
    // re-apply it or emit removal commands.
    {
        let f = fixture();
        let dormant = f.controller.create_server(create_server_input()).await.unwrap();
        let id = dormant.server.id;
        let applied_at = Utc::now() - ChronoDuration::hours(23);
        let wipe = rustpm_controller::core::model::Wipe {
            id: Uuid::new_v4(),
            server_id: id,
            kind: WipeKind::Map,
            seed: 1,
            salt: 2,
            created_at: applied_at,
            applied_at: Some(applied_at),
        };
        f.store.create_wipe(id, wipe).await.unwrap();

        f.controller.start_server(CancellationToken::new(), id).await.unwrap();

        let user_data = f.instances.last_user_data().await;
        assert!(!map_wipe_regex().is_match(&user_data));
        assert!(!blueprint_wipe_regex().is_match(&user_data));

        let server = f.store.get_server(id).await.unwrap();
        assert_eq!(server.current_wipe().unwrap().applied_at, Some(applied_at));
    }

    // Scenario 4: an expired VIP is excluded from the rendered group
    // assignment, even though it is still stored on the server.
    {
        let f = fixture();
        let dormant = f.controller.create_server(create_server_input()).await.unwrap();
        let id = dormant.server.id;
        f.store
            .add_vip(Vip {
                steam_id: "76561197960287930".into(),
                server_id: id,
                expiry: Utc::now() - ChronoDuration::minutes(1),
                subscription_id: "sub_1".into(),
            })
            .await
            .unwrap();

        f.controller.start_server(CancellationToken::new(), id).await.unwrap();

        let user_data = f.instances.last_user_data().await;
        assert!(!user_data.contains("oxide.usergroup add 76561197960287930 vip"));
    }
}

/// Scenario 5: adding the same moderator twice against a live server is
/// recovered as a no-op, and the steam id is still persisted exactly
/// once on the server record.
#[tokio::test]
async fn moderator_add_to_live_server_is_idempotent() {
    let _rcon = MockRconServer::spawn().await;

    let f = fixture();
    let dormant = f.controller.create_server(create_server_input()).await.unwrap();
    let id = dormant.server.id;

    f.controller.start_server(CancellationToken::new(), id).await.unwrap();
    f.controller.make_server_live(CancellationToken::new(), id).await.unwrap();

    let steam_id = "76561197960287930".to_string();
    f.controller.add_server_moderators(id, vec![steam_id.clone()]).await.unwrap();
    f.controller.add_server_moderators(id, vec![steam_id.clone()]).await.unwrap();

    let server = f.store.get_server(id).await.unwrap();
    assert_eq!(server.moderators.len(), 1);
    assert_eq!(server.moderators[0].steam_id, steam_id);
}

/// `StartServer` against an unknown server fails synchronously rather
/// than spawning any instance work.
#[tokio::test]
async fn start_server_on_unknown_id_fails_server_dne() {
    let f = fixture();
    let err = f
        .controller
        .start_server(CancellationToken::new(), Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::ServerDne(_)));
}
