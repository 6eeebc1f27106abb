use std::{str::FromStr, time::Duration};

use bigdecimal::BigDecimal;
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use smt_client::portal::{Credentials, PortalError, ReadOptions, SmtClient};
use time::macros::{date, datetime};

fn fast_options() -> ReadOptions {
    ReadOptions {
        trigger_attempts: 2,
        trigger_retry_delay: Duration::ZERO,
        poll_interval: Duration::ZERO,
        poll_attempts: 3,
        request_timeout: Duration::from_secs(5),
    }
}

fn client_for(server: &ServerGuard) -> SmtClient {
    let creds = Credentials::new("user", "secret").unwrap();
    SmtClient::new(&server.url(), creds, fast_options()).unwrap()
}

async fn mock_login(server: &mut ServerGuard) -> (mockito::Mock, mockito::Mock) {
    let auth = server
        .mock("POST", "/commonapi/user/authenticate")
        .match_body(Matcher::PartialJson(json!({ "username": "user", "password": "secret" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"token":"tok-1"}"#)
        .create_async()
        .await;
    let dashboard = server
        .mock("POST", "/api/dashboard")
        .match_header("authorization", "Bearer tok-1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"data":{"defaultMeterDetails":{"esiid":"10443720001234567","meterNumber":"123456789LG"}}}"#)
        .create_async()
        .await;
    (auth, dashboard)
}

#[tokio::test]
async fn hourly_read_runs_trigger_then_poll() {
    let mut server = Server::new_async().await;
    let (auth, _dashboard) = mock_login(&mut server).await;

    let trigger = server
        .mock("POST", "/api/ondemandread")
        .match_body(Matcher::PartialJson(json!({ "ESIID": "10443720001234567", "MeterNumber": "123456789LG" })))
        .with_status(200)
        .with_body(r#"{"data":{"statusCode":"0","statusReason":"Request submitted successfully for further processing"}}"#)
        .expect(1)
        .create_async()
        .await;
    let latest = server
        .mock("POST", "/api/usage/latestodrread")
        .with_status(200)
        .with_body(r#"{"data":{"odrstatus":"COMPLETED","odrread":"12345.678","odrdate":"09/01/2024 00:00:00"}}"#)
        .create_async()
        .await;

    let client = client_for(&server);
    let read = client.fetch_hourly_read().await.unwrap();

    assert_eq!(read.date, datetime!(2024-09-01 00:00:00 -05:00));
    assert_eq!(read.value, BigDecimal::from_str("12345.678").unwrap());

    auth.assert_async().await;
    trigger.assert_async().await;
    latest.assert_async().await;
}

#[tokio::test]
async fn pending_read_becomes_no_data_after_poll_budget() {
    let mut server = Server::new_async().await;
    let _login = mock_login(&mut server).await;

    let _trigger = server
        .mock("POST", "/api/ondemandread")
        .with_status(200)
        .with_body(r#"{"data":{"statusReason":"You have reached the limit of two On Demand Read request for this ESIID per hour, you may try again after one hour"}}"#)
        .create_async()
        .await;
    let latest = server
        .mock("POST", "/api/usage/latestodrread")
        .with_status(200)
        .with_body(r#"{"data":{"odrstatus":"PENDING","odrread":0,"odrdate":""}}"#)
        .expect(3)
        .create_async()
        .await;

    let client = client_for(&server);
    let err = client.fetch_hourly_read().await.unwrap_err();

    assert!(matches!(err, PortalError::NoData(_)));
    latest.assert_async().await;
}

#[tokio::test]
async fn rate_limited_trigger_takes_the_published_read() {
    let mut server = Server::new_async().await;
    let _login = mock_login(&mut server).await;
    let trigger = server
        .mock("POST", "/api/ondemandread")
        .with_status(200)
        .with_body(r#"{"data":{"statusReason":"You have reached the limit of two On Demand Read request for this ESIID per hour, you may try again after one hour"}}"#)
        .expect(1)
        .create_async()
        .await;
    let latest = server
        .mock("POST", "/api/usage/latestodrread")
        .with_status(200)
        .with_body(r#"{"data":{"odrstatus":"COMPLETED","odrread":12000.5,"odrdate":"09/01/2024 00:00:07"}}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server);
    let read = client.fetch_hourly_read().await.unwrap();

    assert_eq!(read.date, datetime!(2024-09-01 00:00:07 -05:00));
    assert_eq!(read.value, BigDecimal::from_str("12000.5").unwrap());
    trigger.assert_async().await;
    latest.assert_async().await;
}

#[tokio::test]
async fn second_read_in_repeated_fall_back_hour_is_later_instant() {
    let mut server = Server::new_async().await;
    let _login = mock_login(&mut server).await;
    let _trigger = server
        .mock("POST", "/api/ondemandread")
        .with_status(200)
        .with_body(r#"{"data":{"statusReason":"Request submitted successfully for further processing"}}"#)
        .create_async()
        .await;
    let client = client_for(&server);

    let first_latest = server
        .mock("POST", "/api/usage/latestodrread")
        .with_status(200)
        .with_body(r#"{"data":{"odrread":"20000.100","odrdate":"11/03/2024 01:00:12"}}"#)
        .create_async()
        .await;
    let first = client.fetch_hourly_read().await.unwrap();
    first_latest.remove_async().await;

    let _second_latest = server
        .mock("POST", "/api/usage/latestodrread")
        .with_status(200)
        .with_body(r#"{"data":{"odrread":"20001.400","odrdate":"11/03/2024 01:00:09"}}"#)
        .create_async()
        .await;
    let second = client.fetch_hourly_read().await.unwrap();

    assert_eq!(first.date, datetime!(2024-11-03 01:00:12 -05:00));
    assert_eq!(second.date, datetime!(2024-11-03 01:00:09 -06:00));
    assert!(second.date > first.date);
}

#[tokio::test]
async fn rejected_login_is_auth_error() {
    let mut server = Server::new_async().await;
    let _auth = server
        .mock("POST", "/commonapi/user/authenticate")
        .with_status(400)
        .with_body(r#"{"errormessage":"ERR-USR-INVALIDPASSWORDERROR"}"#)
        .create_async()
        .await;

    let client = client_for(&server);
    let err = client.fetch_hourly_read().await.unwrap_err();

    assert!(err.is_auth());
}

#[tokio::test]
async fn token_rejected_after_relogin_is_auth_error() {
    let mut server = Server::new_async().await;
    let auth = server
        .mock("POST", "/commonapi/user/authenticate")
        .with_status(200)
        .with_body(r#"{"token":"tok-1"}"#)
        .expect(2)
        .create_async()
        .await;
    let _dashboard = server
        .mock("POST", "/api/dashboard")
        .with_status(200)
        .with_body(r#"{"data":{"defaultMeterDetails":{"esiid":"1","meterNumber":"2"}}}"#)
        .create_async()
        .await;
    let latest = server
        .mock("POST", "/api/usage/latestodrread")
        .with_status(401)
        .expect(2)
        .create_async()
        .await;

    let client = client_for(&server);
    let err = client
        .session_holder()
        .authed_post("/api/usage/latestodrread", "/dashboard/", |s| json!({ "ESIID": s.esiid }))
        .await
        .unwrap_err();

    assert!(err.is_auth());
    auth.assert_async().await;
    latest.assert_async().await;
}

#[tokio::test]
async fn hourly_read_stops_polling_when_session_keeps_being_rejected() {
    let mut server = Server::new_async().await;
    let auth = server
        .mock("POST", "/commonapi/user/authenticate")
        .with_status(200)
        .with_body(r#"{"token":"tok-1"}"#)
        .expect(2)
        .create_async()
        .await;
    let _dashboard = server
        .mock("POST", "/api/dashboard")
        .with_status(200)
        .with_body(r#"{"data":{"defaultMeterDetails":{"esiid":"1","meterNumber":"2"}}}"#)
        .create_async()
        .await;
    let _trigger = server
        .mock("POST", "/api/ondemandread")
        .with_status(200)
        .with_body(r#"{"data":{"statusReason":"Request submitted successfully for further processing"}}"#)
        .create_async()
        .await;
    let latest = server
        .mock("POST", "/api/usage/latestodrread")
        .with_status(401)
        .expect(2)
        .create_async()
        .await;

    let client = client_for(&server);
    let err = client.fetch_hourly_read().await.unwrap_err();

    assert!(err.is_auth(), "unexpected error: {err:?}");
    auth.assert_async().await;
    latest.assert_async().await;
}

#[tokio::test]
async fn session_is_reused_between_requests() {
    let mut server = Server::new_async().await;
    let auth = server
        .mock("POST", "/commonapi/user/authenticate")
        .with_status(200)
        .with_body(r#"{"token":"tok-1"}"#)
        .expect(1)
        .create_async()
        .await;
    let _dashboard = server
        .mock("POST", "/api/dashboard")
        .with_status(200)
        .with_body(r#"{"data":{"defaultMeterDetails":{"esiid":"1","meterNumber":"2"}}}"#)
        .create_async()
        .await;

    let client = client_for(&server);
    let first = client.session_holder().get_session().await.unwrap();
    let second = client.session_holder().get_session().await.unwrap();

    assert_eq!(first, second);
    auth.assert_async().await;
}

#[tokio::test]
async fn interval_rows_are_passed_through() {
    let mut server = Server::new_async().await;
    let _login = mock_login(&mut server).await;
    let interval = server
        .mock("POST", "/api/usage/interval")
        .match_body(Matcher::PartialJson(json!({ "startDate": "09/01/2024", "endDate": "09/01/2024" })))
        .with_status(200)
        .with_body(
            r#"{"intervaldata":[
                {"date":"2024-09-01","starttime":" 12:00 am","endtime":" 12:15 am","consumption":0.093},
                {"date":"2024-09-01","starttime":" 12:15 am","endtime":" 12:30 am","consumption":"0.101"},
                {"date":"2024-09-01","starttime":" 12:30 am","endtime":" 12:45 am","consumption":0.087}
            ]}"#,
        )
        .create_async()
        .await;

    let client = client_for(&server);
    let reads = client.fetch_interval_reads(date!(2024 - 09 - 01)).await.unwrap();

    assert_eq!(reads.len(), 3);
    assert_eq!(reads[0].interval_start, datetime!(2024-09-01 00:00:00 -05:00));
    assert_eq!(reads[1].value, BigDecimal::from_str("0.101").unwrap());
    assert!(reads.iter().all(|r| r.duration_minutes == 15));
    interval.assert_async().await;
}

#[tokio::test]
async fn unpublished_interval_day_is_empty_not_error() {
    let mut server = Server::new_async().await;
    let _login = mock_login(&mut server).await;
    let _interval = server
        .mock("POST", "/api/usage/interval")
        .with_status(200)
        .with_body(r#"{"intervaldata":[]}"#)
        .create_async()
        .await;

    let client = client_for(&server);
    let reads = client.fetch_interval_reads(date!(2024 - 09 - 01)).await.unwrap();

    assert!(reads.is_empty());
}

#[tokio::test]
async fn partially_published_interval_day_is_empty() {
    let mut server = Server::new_async().await;
    let _login = mock_login(&mut server).await;
    let _interval = server
        .mock("POST", "/api/usage/interval")
        .with_status(200)
        .with_body(
            r#"{"intervaldata":[
                {"date":"2024-09-01","starttime":" 12:00 am","consumption":0.093},
                {"date":"2024-09-01","starttime":" 12:15 am","consumption":null}
            ]}"#,
        )
        .create_async()
        .await;

    let client = client_for(&server);
    let reads = client.fetch_interval_reads(date!(2024 - 09 - 01)).await.unwrap();

    assert!(reads.is_empty());
}
