#[cfg(feature = "serde")]
mod wire {
    use deltatree_core::{ChangeEvent, ClientKey, Delta, DeltaKind, NodeId, VersionedItem};

    #[test]
    fn delta_parses_from_camel_case_json() {
        let json = r#"{
            "kind": "update",
            "id": 7,
            "clientKey": "tmp-1",
            "parentId": 3,
            "version": 5,
            "attributes": { "name": "renamed" }
        }"#;

        let delta: Delta = serde_json::from_str(json).expect("parse delta");
        assert_eq!(delta.kind, DeltaKind::Update);
        assert_eq!(delta.id, NodeId(7));
        assert_eq!(delta.client_key, Some(ClientKey::new("tmp-1")));
        assert_eq!(delta.parent_id, Some(NodeId(3)));
        assert_eq!(delta.version, 5);
        assert_eq!(
            delta.attributes.as_ref().and_then(|a| a.get("name")).map(String::as_str),
            Some("renamed")
        );
    }

    #[test]
    fn delete_needs_only_kind_id_and_version() {
        let delta: Delta =
            serde_json::from_str(r#"{"kind":"delete","id":4,"version":9}"#).expect("parse delete");
        assert_eq!(delta, Delta::delete(NodeId(4), 9));
    }

    #[test]
    fn item_omits_missing_client_key() {
        let item = VersionedItem::new(NodeId(2), Some(NodeId(1)), 3).with_attribute("kind", "folder");
        let json = serde_json::to_value(&item).expect("serialize item");

        assert_eq!(
            json,
            serde_json::json!({
                "id": 2,
                "parentId": 1,
                "version": 3,
                "attributes": { "kind": "folder" }
            })
        );
        let back: VersionedItem = serde_json::from_value(json).expect("deserialize item");
        assert_eq!(back, item);
    }

    #[test]
    fn change_events_are_tagged_by_type() {
        let event = ChangeEvent::Changed {
            id: NodeId(2),
            previous_parent: Some(NodeId(1)),
            parent: Some(NodeId(3)),
        };
        assert_eq!(
            serde_json::to_value(&event).expect("serialize event"),
            serde_json::json!({ "type": "changed", "id": 2, "previousParent": 1, "parent": 3 })
        );
    }
}
