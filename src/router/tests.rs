use super::{RouteOutcome, Router};
use http::Method;

fn table() -> Router<&'static str> {
    let mut router = Router::new();
    router.insert(Method::GET, "/healthz", "health");
    router.insert(Method::GET, "/v1/jobs", "list_jobs");
    router.insert(Method::POST, "/v1/jobs", "create_job");
    router.insert(Method::GET, "/v1/jobs/{id}", "get_job");
    router.insert(Method::POST, "/v1/jobs/{id}/{job:cancel|retry}", "job_action");
    router.insert(
        Method::POST,
        "/v1/inventory/nodes/{id}/{node lifecycle:heartbeat|activate|quarantine|decommission|bootstrap}",
        "node_action",
    );
    router.insert(Method::POST, "/v1/policy/bundles/{id}/promote", "promote");
    router.insert(Method::GET, "/v1/policy/bundles/{id}/promotions", "promotions");
    router
}

#[test]
fn test_exact_match() {
    match table().route(&Method::GET, "/v1/jobs") {
        RouteOutcome::Matched(m) => {
            assert_eq!(m.handler, "list_jobs");
            assert_eq!(m.pattern.as_ref(), "/v1/jobs");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_method_selects_arm() {
    match table().route(&Method::POST, "/v1/jobs/") {
        RouteOutcome::Matched(m) => assert_eq!(m.handler, "create_job"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_wrong_method_is_405() {
    match table().route(&Method::DELETE, "/v1/jobs") {
        RouteOutcome::MethodNotAllowed { allowed } => {
            assert!(allowed.contains(&Method::GET));
            assert!(allowed.contains(&Method::POST));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        table().route(&Method::GET, "/v1/jobs/j1/cancel"),
        RouteOutcome::MethodNotAllowed { .. }
    ));
}

#[test]
fn test_structural_mismatch_is_404() {
    let router = table();
    for path in ["/v2/jobs", "/v1/jobz/j1", "/v1/jobs/j1/cancel/now", "/v1/policy/bundles/b1/demote/x", "/"] {
        assert!(
            matches!(router.route(&Method::POST, path), RouteOutcome::NotFound),
            "{path}"
        );
    }
}

#[test]
fn test_unknown_action_reports_kind() {
    match table().route(&Method::POST, "/v1/jobs/j1/explode") {
        RouteOutcome::UnknownAction { kind } => assert_eq!(kind.as_ref(), "job"),
        other => panic!("unexpected {other:?}"),
    }
    match table().route(&Method::POST, "/v1/inventory/nodes/n1/reboot") {
        RouteOutcome::UnknownAction { kind } => assert_eq!(kind.as_ref(), "node lifecycle"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_literal_sibling_of_param_route() {
    match table().route(&Method::GET, "/v1/policy/bundles/b1/promotions") {
        RouteOutcome::Matched(m) => {
            assert_eq!(m.handler, "promotions");
            assert_eq!(m.get_path_param("id"), Some("b1"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_routes_listing_preserves_order() {
    let router = table();
    let routes = router.routes();
    assert_eq!(routes.len(), 9);
    assert_eq!(routes[0].1.as_ref(), "/healthz");
}
