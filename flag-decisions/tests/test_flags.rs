use anyhow::Result;
use assert_json_diff::assert_json_include;

use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::common::*;

use flag_decisions::flags::{EmergencyOverride, KillSwitchScope};
use flag_decisions::targeting::RolloutConfig;
use flag_decisions::test_utils::{flag, random_context, seeded_store};

pub mod common;

#[tokio::test]
async fn it_evaluates_every_flag_for_a_tenant() -> Result<()> {
    let server = ServerHandle::for_store(seeded_store()).await;

    let res = server
        .post(
            "/flags/evaluate",
            json!({"tenant_id": "acme", "user_id": "user-1"}).to_string(),
        )
        .await;
    assert_eq!(StatusCode::OK, res.status());

    let json_data = res.json::<Value>().await?;
    assert_json_include!(
        actual: json_data,
        expected: json!({
            "flags": {
                "always-on": true,
                "always-off": false,
                "full-rollout": true,
                "no-rollout": false,
                "treated": true,
                "overridden": true,
            }
        })
    );

    // the override only applies to acme
    let res = server
        .post("/flags/evaluate", json!({"tenantId": "globex"}).to_string())
        .await;
    let json_data = res.json::<Value>().await?;
    assert_eq!(json_data["flags"]["overridden"], json!(false));

    Ok(())
}

#[tokio::test]
async fn it_falls_back_to_the_default_for_untargeted_users() -> Result<()> {
    let store = seeded_store();
    store.put_flag(flag("dark-launch", true).with_rollout(RolloutConfig::percentage(0.0)));
    let server = ServerHandle::for_store(store).await;

    // any tenant and user: tenant-wide rules give the same answer everywhere
    let context = random_context();
    let res = server
        .post("/flags/evaluate", serde_json::to_string(&context)?)
        .await;
    assert_eq!(StatusCode::OK, res.status());
    assert_json_include!(
        actual: res.json::<Value>().await?,
        expected: json!({
            "flags": {
                "always-on": true,
                "no-rollout": false,
                "overridden": false,
                "dark-launch": true,
            }
        })
    );

    let decision = server
        .post("/flags/dark-launch/evaluate", serde_json::to_string(&context)?)
        .await
        .json::<Value>()
        .await?;
    assert_eq!(
        decision,
        json!({"flag_key": "dark-launch", "enabled": true, "reason": "default"})
    );

    Ok(())
}

#[tokio::test]
async fn it_explains_a_single_decision() -> Result<()> {
    let server = ServerHandle::for_store(seeded_store()).await;
    let context = json!({"tenant_id": "acme", "user_id": "user-1"}).to_string();

    let first = server
        .post("/flags/always-on/evaluate", context.clone())
        .await
        .json::<Value>()
        .await?;
    assert_eq!(
        first,
        json!({"flag_key": "always-on", "enabled": true, "reason": "default"})
    );

    let second = server
        .post("/flags/always-on/evaluate", context.clone())
        .await
        .json::<Value>()
        .await?;
    assert_eq!(second["reason"], json!("cache_hit"));

    let treated = server
        .post("/flags/treated/evaluate", context.clone())
        .await
        .json::<Value>()
        .await?;
    assert_json_include!(
        actual: treated,
        expected: json!({"enabled": true, "reason": "experiment", "variant": "treatment"})
    );

    let unknown = server
        .post("/flags/does-not-exist/evaluate", context)
        .await
        .json::<Value>()
        .await?;
    assert_json_include!(
        actual: unknown,
        expected: json!({"enabled": false, "reason": "unknown_flag"})
    );

    Ok(())
}

#[tokio::test]
async fn it_honours_kill_switches_after_invalidation() -> Result<()> {
    let store = seeded_store();
    let server = ServerHandle::for_store(store.clone()).await;
    let context = json!({"tenant_id": "acme"}).to_string();

    let before = server
        .post("/flags/always-on/evaluate", context.clone())
        .await
        .json::<Value>()
        .await?;
    assert_eq!(before["enabled"], json!(true));

    store.put_kill_switch(EmergencyOverride::forced_off(
        KillSwitchScope::Flag("always-on".to_string()),
        "incident",
    ));

    // still served from the cache
    let cached = server
        .post("/flags/always-on/evaluate", context.clone())
        .await
        .json::<Value>()
        .await?;
    assert_eq!(cached["reason"], json!("cache_hit"));

    let res = server
        .post("/cache/invalidate", json!({"flag_key": "always-on"}).to_string())
        .await;
    assert_eq!(StatusCode::OK, res.status());
    assert_json_include!(
        actual: res.json::<Value>().await?,
        expected: json!({"scope": "flag", "remaining_entries": 0})
    );

    let after = server
        .post("/flags/always-on/evaluate", context)
        .await
        .json::<Value>()
        .await?;
    assert_json_include!(
        actual: after,
        expected: json!({"enabled": false, "reason": "flag_kill_switch"})
    );

    Ok(())
}

#[tokio::test]
async fn it_fails_safe_when_the_store_is_down() -> Result<()> {
    let store = seeded_store();
    let server = ServerHandle::for_store(store.clone()).await;
    store.set_unavailable(true);

    let decision = server
        .post("/flags/always-on/evaluate", json!({"tenant_id": "acme"}).to_string())
        .await
        .json::<Value>()
        .await?;
    assert_json_include!(
        actual: decision,
        expected: json!({"enabled": false, "reason": "store_error"})
    );

    let res = server
        .post("/flags/evaluate", json!({"tenant_id": "acme"}).to_string())
        .await;
    assert_eq!(StatusCode::SERVICE_UNAVAILABLE, res.status());
    assert_eq!(res.json::<Value>().await?["code"], json!("store_unavailable"));

    let res = server.get("/_readiness").await;
    assert_eq!(StatusCode::SERVICE_UNAVAILABLE, res.status());

    store.set_unavailable(false);
    let decision = server
        .post("/flags/always-on/evaluate", json!({"tenant_id": "acme"}).to_string())
        .await
        .json::<Value>()
        .await?;
    assert_eq!(decision["enabled"], json!(true));

    Ok(())
}

#[tokio::test]
async fn it_rejects_bad_requests() -> Result<()> {
    let server = ServerHandle::for_store(seeded_store()).await;

    let res = server.post("/flags/evaluate", "not json").await;
    assert_eq!(StatusCode::BAD_REQUEST, res.status());
    assert_eq!(res.json::<Value>().await?["code"], json!("request_parsing_error"));

    let res = server
        .post("/flags/evaluate", json!({"user_id": "u"}).to_string())
        .await;
    assert_eq!(StatusCode::BAD_REQUEST, res.status());

    let res = server
        .post("/flags/always-on/evaluate", json!({"tenant_id": ""}).to_string())
        .await;
    assert_eq!(StatusCode::BAD_REQUEST, res.status());
    assert_eq!(res.json::<Value>().await?["code"], json!("empty_field"));

    let res = server.post("/cache/invalidate", "{}").await;
    assert_eq!(StatusCode::BAD_REQUEST, res.status());

    Ok(())
}

#[tokio::test]
async fn it_reports_health() -> Result<()> {
    let server = ServerHandle::for_store(seeded_store()).await;

    let res = server.get("/").await;
    assert_eq!(StatusCode::OK, res.status());
    assert_eq!(res.text().await?, "flag decisions");

    assert_eq!(StatusCode::OK, server.get("/_liveness").await.status());
    assert_eq!(StatusCode::OK, server.get("/_readiness").await.status());

    Ok(())
}

#[tokio::test]
async fn it_assigns_chained_experiments() -> Result<()> {
    let server = ServerHandle::for_store(seeded_store()).await;

    let payload = json!({
        "context": {"tenant_id": "acme", "user_id": "user-1"},
        "experiments": [
            {
                "flag_key": "checkout",
                "config": {
                    "test_id": "exp-checkout",
                    "is_active": true,
                    "variants": [
                        {"id": "control", "name": "Control", "weight": 0},
                        {"id": "one-page", "name": "One page", "weight": 100, "config": {"steps": 1}}
                    ]
                }
            },
            {
                "flag_key": "pricing",
                "config": {
                    "test_id": "exp-pricing",
                    "is_active": false,
                    "variants": [{"id": "annual", "weight": 100}]
                }
            }
        ]
    });

    let res = server.post("/experiments/assign", payload.to_string()).await;
    assert_eq!(StatusCode::OK, res.status());

    let json_data = res.json::<Value>().await?;
    assert_json_include!(
        actual: json_data,
        expected: json!({
            "assignments": [
                {
                    "test_id": "exp-checkout",
                    "variant_id": "one-page",
                    "variant_name": "One page",
                    "config": {"steps": 1},
                    "is_control": false
                },
                {
                    "test_id": "exp-pricing",
                    "is_control": true
                }
            ],
            "previous_variants": {"checkout": "one-page"}
        })
    );

    Ok(())
}

#[tokio::test]
async fn it_tracks_conversions() -> Result<()> {
    let server = ServerHandle::for_store(seeded_store()).await;

    for (user, value) in [("u1", 10.0), ("u2", 5.5), ("u1", 2.0)] {
        let res = server
            .post(
                "/experiments/conversions",
                json!({"testId": "exp-1", "variantId": "treatment", "userId": user, "value": value})
                    .to_string(),
            )
            .await;
        assert_eq!(StatusCode::ACCEPTED, res.status());
    }

    // malformed conversions are accepted and dropped
    let res = server
        .post(
            "/experiments/conversions",
            json!({"test_id": "exp-1", "variant_id": ""}).to_string(),
        )
        .await;
    assert_eq!(StatusCode::ACCEPTED, res.status());

    let stats = server
        .get("/experiments/exp-1/conversions")
        .await
        .json::<Value>()
        .await?;
    assert_json_include!(
        actual: stats,
        expected: json!({
            "test_id": "exp-1",
            "variants": [
                {"variant_id": "treatment", "conversions": 3, "total_value": 17.5, "unique_users": 2}
            ]
        })
    );

    Ok(())
}

#[tokio::test]
async fn it_serves_usage_analytics() -> Result<()> {
    let store = seeded_store();
    store.put_flag(flag("search", true));
    let server = ServerHandle::for_store(store).await;

    for (tenant, user) in [("acme", "u1"), ("acme", "u2"), ("globex", "u3")] {
        let res = server
            .post(
                "/flags/search/evaluate",
                json!({"tenant_id": tenant, "user_id": user, "region": "eu-west-1"}).to_string(),
            )
            .await;
        assert_eq!(StatusCode::OK, res.status());
    }

    let metrics = server.wait_for_evaluations("search", 3).await;
    assert_json_include!(
        actual: metrics,
        expected: json!({
            "evaluation_count": 3,
            "enabled_rate": 1.0,
            "error_rate": 0.0,
            "unique_users": 3,
            "tenant_distribution": {"acme": 2, "globex": 1}
        })
    );

    let pattern = server
        .get("/analytics/flags/search/pattern")
        .await
        .json::<Value>()
        .await?;
    assert_json_include!(
        actual: pattern,
        expected: json!({"flag_key": "search", "total_records": 3, "regions": {"eu-west-1": 3}})
    );

    let forecast = server
        .get("/analytics/flags/search/forecast?hours_ahead=6")
        .await
        .json::<Value>()
        .await?;
    assert_json_include!(
        actual: forecast,
        expected: json!({"predicted_load": 3.0, "confidence": 0.3, "trend": "stable", "hours_ahead": 6})
    );

    let far = server
        .get("/analytics/flags/search/forecast?hours_ahead=4000000000")
        .await
        .json::<Value>()
        .await?;
    assert_eq!(far["hours_ahead"], json!(168));
    assert!(far["predicted_load"].is_f64());

    let recommendations = server
        .get("/analytics/flags/search/recommendations")
        .await
        .json::<Value>()
        .await?;
    assert_eq!(recommendations[0]["type"], json!("regional_cache"));

    let summary = server.get("/analytics/summary").await.json::<Value>().await?;
    assert_json_include!(
        actual: summary,
        expected: json!({"total_flags": 1, "total_evaluations": 3, "top_flags": [{"flag_key": "search"}]})
    );

    let res = server.get("/analytics/flags/never-evaluated/metrics").await;
    assert_eq!(StatusCode::NOT_FOUND, res.status());

    Ok(())
}
