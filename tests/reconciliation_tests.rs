//! Client reconciliation and snapshot tests

#[cfg(test)]
mod tests {
    use scene_sync::{
        ChecksumAlgorithm, Delta, DeltaKind, MergeError, SyncConfig, SyncError, SyncService,
        Vec3,
    };
    use serde_json::{json, Value};
    use tokio_test::{assert_err, assert_ok};

    fn delta(id: &str, origin: &str, kind: DeltaKind, clock: &[(&str, u64)], payload: Value) -> Delta {
        Delta::new(
            id,
            origin,
            kind,
            payload,
            clock.iter().map(|(o, c)| (*o, *c)).collect(),
            ChecksumAlgorithm::Sha256,
        )
        .unwrap()
    }

    fn make_service() -> SyncService {
        SyncService::new(SyncConfig::default())
    }

    // -----------------------------------------------------------------------
    // Prediction / confirmation
    // -----------------------------------------------------------------------

    #[test]
    fn accepted_predictions_are_confirmed() {
        let svc = make_service();
        svc.register_client("c1");

        let batch = vec![
            delta(
                "p1",
                "c1",
                DeltaKind::EntityCreate,
                &[("c1", 1)],
                json!({"id": "lamp", "name": "Lamp", "components": {"on": false}}),
            ),
            delta(
                "p2",
                "c1",
                DeltaKind::EntityUpdate,
                &[("c1", 2)],
                json!({"id": "lamp", "components": {"on": true}}),
            ),
        ];

        let accepted = assert_ok!(svc.sync_client_deltas("c1", batch));
        let ids: Vec<&str> = accepted.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["p1", "p2"]);

        let client = svc.client("c1").unwrap();
        assert_eq!(client.confirmed_ops, ["p1", "p2"]);
        assert!(client.predicted_ops.is_empty());
        assert!(client.last_sync > 0);

        let world = svc.snapshot();
        assert_eq!(world.version, 2);
        assert_eq!(world.entities["lamp"].components["on"], true);
    }

    #[test]
    fn failed_predictions_stay_predicted_and_are_skipped() {
        let svc = make_service();
        svc.register_client("c1");

        let mut tampered = delta(
            "p2",
            "c1",
            DeltaKind::SceneUpdate,
            &[("c1", 2)],
            json!({"lighting": {"sun": "noon"}}),
        );
        tampered.checksum = "0".repeat(64);

        let batch = vec![
            delta(
                "p1",
                "c1",
                DeltaKind::AvatarMove,
                &[("c1", 1)],
                json!({"session_id": "s1", "position": [0, 1, 0]}),
            ),
            tampered,
            delta(
                "p3",
                "c1",
                DeltaKind::EntityUpdate,
                &[("c1", 3)],
                json!({"id": "missing", "name": "ghost"}),
            ),
        ];

        let accepted = assert_ok!(svc.sync_client_deltas("c1", batch));
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].id, "p1");

        let client = svc.client("c1").unwrap();
        assert_eq!(client.confirmed_ops, ["p1"]);
        assert_eq!(client.predicted_ops, ["p2", "p3"]);
        assert_eq!(svc.version(), 1);
    }

    #[test]
    fn detailed_sync_reports_every_outcome() {
        let svc = make_service();
        svc.register_client("c1");

        let batch = vec![
            delta(
                "p1",
                "c1",
                DeltaKind::SceneUpdate,
                &[("c1", 1)],
                json!({"physics": {"gravity": -9.8}}),
            ),
            delta(
                "p2",
                "c1",
                DeltaKind::EntityUpdate,
                &[("c1", 2)],
                json!({"id": "nope"}),
            ),
        ];

        let outcomes = assert_ok!(svc.sync_client_deltas_detailed("c1", batch));
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].1, Ok(1));
        assert_eq!(
            outcomes[1].1,
            Err(SyncError::Merge(MergeError::EntityNotFound("nope".into())))
        );
    }

    #[test]
    fn reconciliation_skips_the_causality_gate() {
        let svc = make_service();
        svc.register_client("c2");

        // Depends on a counter the server has never seen.
        let ahead = delta(
            "p1",
            "c2",
            DeltaKind::SceneUpdate,
            &[("c1", 5), ("c2", 1)],
            json!({"lighting": {"fog": 0.2}}),
        );
        let accepted = assert_ok!(svc.sync_client_deltas("c2", vec![ahead]));
        assert_eq!(accepted.len(), 1);
        assert_eq!(svc.pending_len(), 0);
        assert_eq!(svc.world_clock().get("c2"), 1);
    }

    #[test]
    fn sync_never_overtakes_a_queued_delta_from_the_same_origin() {
        let svc = make_service();
        svc.register_client("c2");

        let waiting = delta(
            "m1",
            "c2",
            DeltaKind::AvatarMove,
            &[("c1", 1), ("c2", 1)],
            json!({"session_id": "s2", "position": [1, 1, 1]}),
        );
        assert_ok!(svc.apply_delta(waiting));

        let later = delta(
            "m2",
            "c2",
            DeltaKind::AvatarMove,
            &[("c2", 2)],
            json!({"session_id": "s2", "position": [2, 2, 2]}),
        );
        let outcomes = assert_ok!(svc.sync_client_deltas_detailed("c2", vec![later]));
        assert_eq!(
            outcomes[0].1,
            Err(SyncError::OriginBacklogged("c2".into()))
        );
        assert_eq!(svc.version(), 0);

        assert_ok!(svc.apply_delta(delta(
            "d1",
            "c1",
            DeltaKind::EntityCreate,
            &[("c1", 1)],
            json!({"id": "e1", "name": "box", "components": {}}),
        )));
        svc.resolve_pending();

        // Only m1 applied; the client rolls m2 back and resubmits.
        assert_eq!(svc.snapshot().avatars["s2"].position, Vec3::new(1.0, 1.0, 1.0));
        assert_eq!(svc.client("c2").unwrap().predicted_ops, ["m2"]);
        assert_eq!(svc.version(), 2);
    }

    #[test]
    fn long_lived_clients_keep_bounded_op_lists() {
        let svc = SyncService::new(SyncConfig {
            client_op_history: 2,
            ..SyncConfig::default()
        });
        svc.register_client("c1");

        for counter in 1..=5u64 {
            let id = format!("p{counter}");
            assert_ok!(svc.sync_client_deltas(
                "c1",
                vec![delta(
                    &id,
                    "c1",
                    DeltaKind::SceneUpdate,
                    &[("c1", counter)],
                    json!({"physics": {"step": counter}}),
                )],
            ));
        }

        let client = svc.client("c1").unwrap();
        assert_eq!(client.confirmed_ops, ["p4", "p5"]);
        assert_eq!(svc.stats().delta_log_len, 5);
    }

    #[test]
    fn unknown_client_cannot_sync() {
        let svc = make_service();
        let err = assert_err!(svc.sync_client_deltas("stranger", vec![]));
        assert_eq!(err, SyncError::UnknownClient("stranger".into()));
    }

    // -----------------------------------------------------------------------
    // Client clocks
    // -----------------------------------------------------------------------

    #[test]
    fn client_clock_tracks_applied_deltas() {
        let svc = make_service();
        svc.register_client("c1");
        assert!(svc.get_vector_clock("c1").unwrap().is_empty());
        assert!(svc.get_vector_clock("nobody").is_none());

        assert_ok!(svc.apply_delta(delta(
            "d1",
            "c1",
            DeltaKind::AvatarMove,
            &[("c1", 3)],
            json!({"session_id": "s1", "position": [0, 0, 0]}),
        )));
        assert_eq!(svc.get_vector_clock("c1").unwrap().get("c1"), 3);

        // Re-registering keeps history.
        svc.register_client("c1");
        assert_eq!(svc.get_vector_clock("c1").unwrap().get("c1"), 3);

        assert!(svc.unregister_client("c1").is_some());
        assert!(svc.get_vector_clock("c1").is_none());
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    #[test]
    fn snapshot_is_independent_of_later_changes() {
        let svc = make_service();
        svc.register_avatar("s1", Some("lobby".into()), Vec3::zero());
        let before = svc.snapshot();

        assert_ok!(svc.update_avatar_position("s1", Vec3::new(5.0, 0.0, 0.0), None));
        assert_ok!(svc.apply_delta(delta(
            "d1",
            "c1",
            DeltaKind::EntityCreate,
            &[("c1", 1)],
            json!({"id": "e1", "name": "tree", "components": {}}),
        )));

        assert_eq!(before.avatars["s1"].position, Vec3::zero());
        assert!(before.entities.is_empty());
        assert_ne!(before.checksum, svc.snapshot().checksum);
    }

    #[test]
    fn channel_snapshot_filters_avatars_only() {
        let svc = make_service();
        svc.register_avatar("s1", Some("lobby".into()), Vec3::zero());
        svc.register_avatar("s2", Some("arena".into()), Vec3::zero());
        svc.register_avatar("s3", None, Vec3::zero());
        assert_ok!(svc.apply_delta(delta(
            "d1",
            "c1",
            DeltaKind::EntityCreate,
            &[("c1", 1)],
            json!({"id": "e1", "name": "tree", "components": {}}),
        )));

        let full = svc.snapshot();
        let lobby = svc.snapshot_for_channel("lobby");
        assert_eq!(lobby.avatars.keys().collect::<Vec<_>>(), ["s1"]);
        assert_eq!(lobby.entities.len(), 1);
        assert_eq!(lobby.version, full.version);
        assert_eq!(lobby.checksum, full.checksum);

        assert!(svc.snapshot_for_channel("void").avatars.is_empty());
    }

    // -----------------------------------------------------------------------
    // Session-layer avatar mutations
    // -----------------------------------------------------------------------

    #[test]
    fn avatar_session_mutations() {
        let svc = make_service();
        svc.register_avatar("s1", None, Vec3::zero());
        let registered = svc.snapshot();
        assert_eq!(registered.version, 0);

        assert_ok!(svc.update_avatar_position_in_channel("s1", "lobby", Vec3::one(), None));
        let moved = svc.snapshot();
        assert_eq!(moved.avatars["s1"].channel_id.as_deref(), Some("lobby"));
        assert_eq!(moved.avatars["s1"].position, Vec3::one());
        assert_eq!(moved.version, 0);
        assert_ne!(moved.checksum, registered.checksum);

        assert_ok!(svc.clear_avatar_channel("s1"));
        assert!(svc.snapshot().avatars["s1"].channel_id.is_none());

        assert_eq!(
            assert_err!(svc.update_avatar_position("ghost", Vec3::one(), None)),
            SyncError::UnknownAvatar("ghost".into())
        );
        assert_err!(svc.clear_avatar_channel("ghost"));

        assert!(svc.remove_avatar("s1").is_some());
        assert!(svc.remove_avatar("s1").is_none());
        assert_eq!(svc.stats().avatars, 0);
    }
}
