mod common;

use anyhow::Result;
use reqwest::StatusCode;

#[tokio::test]
async fn health_reports_database_ok() -> Result<()> {
    let Some(server) = common::ensure_server().await? else {
        return Ok(());
    };

    let res = reqwest::get(server.url("/health")).await?;
    assert_eq!(res.status(), StatusCode::OK);

    let body = res.json::<serde_json::Value>().await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "ok");
    Ok(())
}

#[tokio::test]
async fn unknown_routes_are_404_with_toast() -> Result<()> {
    let Some(server) = common::ensure_server().await? else {
        return Ok(());
    };

    let res = reqwest::get(server.url("/api/v1/nothing-here")).await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(res.headers()["x-ui-toast"], "true");
    Ok(())
}
