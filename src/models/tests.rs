use super::*;

// ── Carrier ─────────────────────────────────────────────────────

#[test]
fn carrier_parse_is_case_insensitive() {
    assert_eq!(Carrier::parse("UPS"), Some(Carrier::Ups));
    assert_eq!(Carrier::parse("FedEx"), Some(Carrier::Fedex));
    assert_eq!(Carrier::parse(" usps "), Some(Carrier::Usps));
    assert_eq!(Carrier::parse("dhl"), Some(Carrier::Dhl));
    assert_eq!(Carrier::parse("ontrac"), None);
    assert_eq!(Carrier::parse(""), None);
}

#[test]
fn carrier_serializes_snake_case() {
    assert_eq!(serde_json::to_value(Carrier::Fedex).unwrap(), "fedex");
    let parsed: Carrier = serde_json::from_str("\"usps\"").unwrap();
    assert_eq!(parsed, Carrier::Usps);
}

// ── Status transitions ──────────────────────────────────────────

#[test]
fn forward_transitions_allowed() {
    use PackageStatus::*;
    assert!(Pickup.can_transition_to(InTransit));
    assert!(Shipped.can_transition_to(InTransit));
    assert!(InTransit.can_transition_to(OutForDelivery));
    assert!(OutForDelivery.can_transition_to(Delivered));
    assert!(InTransit.can_transition_to(Delivered));
}

#[test]
fn same_stage_moves_rejected() {
    use PackageStatus::*;
    assert!(!Shipped.can_transition_to(Pickup));
    assert!(!Pickup.can_transition_to(Shipped));
}

#[test]
fn backward_transitions_rejected() {
    use PackageStatus::*;
    assert!(!OutForDelivery.can_transition_to(InTransit));
    assert!(!InTransit.can_transition_to(Pickup));
    assert!(!OutForDelivery.can_transition_to(Shipped));
}

#[test]
fn delivered_is_terminal() {
    use PackageStatus::*;
    for next in [Pickup, Shipped, InTransit, OutForDelivery, Exception, Unknown] {
        assert!(!Delivered.can_transition_to(next), "delivered -> {next}");
    }
}

#[test]
fn exception_reachable_from_any_non_terminal_state() {
    use PackageStatus::*;
    for current in [Pickup, Shipped, InTransit, OutForDelivery, Unknown] {
        assert!(current.can_transition_to(Exception), "{current} -> exception");
    }
}

#[test]
fn exception_can_resume_on_path() {
    use PackageStatus::*;
    assert!(Exception.can_transition_to(InTransit));
    assert!(Exception.can_transition_to(Delivered));
}

#[test]
fn unknown_never_overwrites() {
    use PackageStatus::*;
    for current in [Pickup, Shipped, InTransit, OutForDelivery, Exception] {
        assert!(!current.can_transition_to(Unknown));
    }
}

#[test]
fn identical_status_is_not_a_transition() {
    use PackageStatus::*;
    assert!(!InTransit.can_transition_to(InTransit));
    assert!(!Exception.can_transition_to(Exception));
}

#[test]
fn status_from_db_is_lenient() {
    assert_eq!(PackageStatus::from_db("in_transit"), PackageStatus::InTransit);
    assert_eq!(PackageStatus::from_db("DELIVERED"), PackageStatus::Delivered);
    assert_eq!(PackageStatus::from_db("manifest_pickup"), PackageStatus::Unknown);
    assert_eq!(PackageStatus::from_db(""), PackageStatus::Unknown);
}

// ── Integrations ────────────────────────────────────────────────

fn integration(service_type: &str, service_name: &str) -> Integration {
    Integration {
        id: "int-1".into(),
        service_type: service_type.into(),
        service_name: service_name.into(),
        credentials: Credentials::default(),
        is_active: true,
        is_connected: true,
        last_sync_at: None,
        last_error: None,
    }
}

#[test]
fn integration_carrier_requires_carrier_service_type() {
    assert_eq!(integration("carrier", "UPS").carrier(), Some(Carrier::Ups));
    assert_eq!(integration("payment", "ups").carrier(), None);
    assert_eq!(integration("carrier", "stripe").carrier(), None);
}

#[test]
fn credentials_debug_redacts_secrets() {
    let creds = Credentials {
        access_token: Some("secret-token".into()),
        user_id: None,
        api_key: Some("dhl-key".into()),
    };
    let debug = format!("{creds:?}");
    assert!(!debug.contains("secret-token"));
    assert!(!debug.contains("dhl-key"));
    assert!(debug.contains("<redacted>"));
}

#[test]
fn credentials_tolerate_missing_fields() {
    let creds: Credentials = serde_json::from_str(r#"{"api_key":"k"}"#).unwrap();
    assert_eq!(creds.api_key.as_deref(), Some("k"));
    assert!(creds.access_token.is_none());
}

// ── Response shapes ─────────────────────────────────────────────

#[test]
fn sync_response_uses_camel_case() {
    let resp = SyncResponse {
        success: false,
        message: "Updated 1 packages".into(),
        packages_updated: 1,
        results: vec![CarrierSyncResult {
            carrier: Carrier::Fedex,
            integration_id: "int-1".into(),
            packages_processed: 2,
            packages_updated: 1,
            notifications_queued: 1,
            errors: 1,
            execution_time_ms: 40,
        }],
        errors: vec![BatchError {
            tracking_number: Some("7946".into()),
            carrier: Some(Carrier::Fedex),
            kind: "carrier_api".into(),
            message: "fedex API error (500): boom".into(),
        }],
    };
    let json = serde_json::to_value(&resp).unwrap();
    assert_eq!(json["packagesUpdated"], 1);
    assert_eq!(json["results"][0]["packagesProcessed"], 2);
    assert_eq!(json["results"][0]["integrationId"], "int-1");
    assert_eq!(json["errors"][0]["trackingNumber"], "7946");
    assert_eq!(json["errors"][0]["kind"], "carrier_api");
}

#[test]
fn idle_response_is_successful() {
    let resp = SyncResponse::idle("No packages need tracking updates");
    assert!(resp.success);
    assert_eq!(resp.packages_updated, 0);
    assert!(resp.errors.is_empty());
}

#[test]
fn tracking_event_omits_empty_fields() {
    let evt = TrackingEvent {
        description: Some("Delivered".into()),
        ..Default::default()
    };
    let json = serde_json::to_value(&evt).unwrap();
    assert_eq!(json, serde_json::json!({ "description": "Delivered" }));
}

#[test]
fn status_override_defaults_to_notify() {
    let req: StatusOverride = serde_json::from_str(r#"{"status":"exception"}"#).unwrap();
    assert_eq!(req.status, PackageStatus::Exception);
    assert!(req.notify);
    assert!(req.note.is_none());
}
