//! End-to-end resolution over HTTP against a mock converter.

use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use ratebank_fx::{
    FxError, HttpTransport, MemorySharedStore, RateResolver, ResolverConfig, RetryPolicy,
    SharedStore, Transport, TransportError,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn resolver_for(server: &MockServer) -> RateResolver {
    let config = ResolverConfig {
        endpoint: server.url("/finance/converter"),
        retry: RetryPolicy::immediate(3),
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    RateResolver::with_http(config).unwrap()
}

#[test]
fn resolves_plain_payload_and_caches_it() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/finance/converter")
            .query_param("a", "1")
            .query_param("from", "SGD")
            .query_param("to", "USD");
        then.status(200)
            .body("<div id=currency_converter_result>1 SGD = <span class=bld>0.8066 USD</span>");
    });

    let resolver = resolver_for(&server);

    assert_eq!(resolver.resolve("sgd", "usd").unwrap(), dec!(0.8066));
    assert_eq!(resolver.resolve("SGD", "USD").unwrap(), dec!(0.8066));
    mock.assert_calls(1);
}

#[test]
fn resolves_latin1_structured_payload_with_exponent() {
    let server = MockServer::start();
    let body: &[u8] = b"{lhs: \"1\xa0Vietnamese dong\",rhs: \"4.8 \\x26#215; 10\\x3csup\\x3e-5\\x3c/sup\\x3e U.S. dollars\",error: \"\",icc: true}";
    server.mock(|when, then| {
        when.method(GET).query_param("from", "USD").query_param("to", "VND");
        then.status(200)
            .body("{lhs: \"1 U.S. dollar\",rhs: \"20833.3333 Vietnamese dong\",error: \"\",icc: true}");
    });
    server.mock(|when, then| {
        when.method(GET).query_param("from", "VND").query_param("to", "USD");
        then.status(200).body(body);
    });

    let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
    let url = format!("{}?a=1&from=VND&to=USD", server.url("/finance/converter"));
    assert_eq!(transport.get(&url).unwrap(), body.to_vec());

    // 4.8e-5 is under the inversion threshold, so the opposite quote wins.
    let resolver = resolver_for(&server);
    assert_eq!(
        resolver.resolve("VND", "USD").unwrap(),
        Decimal::ONE / dec!(20833.3333)
    );
}

#[test]
fn retries_server_errors_up_to_the_bound() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).query_param("from", "USD").query_param("to", "EUR");
        then.status(503).body("Service Unavailable");
    });

    let resolver = resolver_for(&server);
    let err = resolver.resolve("USD", "EUR").unwrap_err();

    assert!(matches!(err, FxError::Network { attempts: 3, .. }));
    mock.assert_calls(3);
}

#[test]
fn does_not_retry_client_errors() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).query_param("from", "USD").query_param("to", "EUR");
        then.status(400).body("Bad Request");
    });

    let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
    let url = format!("{}?a=1&from=USD&to=EUR", server.url("/finance/converter"));
    assert_eq!(transport.get(&url).unwrap_err(), TransportError::Status(400));

    let resolver = resolver_for(&server);
    assert!(matches!(
        resolver.resolve("USD", "EUR").unwrap_err(),
        FxError::Network { attempts: 1, .. }
    ));
    mock.assert_calls(2);
}

#[test]
fn falls_back_when_upstream_cannot_convert() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).query_param("from", "EUR").query_param("to", "BAM");
        then.status(200).body("{lhs: \"\",rhs: \"\",error: \"4\",icc: false}");
    });
    server.mock(|when, then| {
        when.method(GET).query_param("from", "USD").query_param("to", "ALL");
        then.status(200).body("<div>Could not convert.</div>");
    });

    let resolver = resolver_for(&server);

    assert_eq!(resolver.resolve("EUR", "BAM").unwrap(), dec!(1.95583));
    assert!(matches!(
        resolver.resolve("USD", "ALL").unwrap_err(),
        FxError::UnknownRate(_)
    ));
}

#[test]
fn shared_store_is_read_before_network() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).query_param("from", "GBP").query_param("to", "USD");
        then.status(200).body("<span class=bld>1.2702 USD</span>");
    });

    let shared = Arc::new(MemorySharedStore::new());
    let first = resolver_for(&server).with_shared_store(shared.clone());
    let second = resolver_for(&server).with_shared_store(shared.clone());

    assert_eq!(first.resolve("GBP", "USD").unwrap(), dec!(1.2702));
    assert_eq!(second.resolve("GBP", "USD").unwrap(), dec!(1.2702));

    assert_eq!(shared.read("GBP:USD").unwrap(), Some(dec!(1.2702)));
    mock.assert_calls(1);
}

#[test]
fn unreachable_upstream_surfaces_network_error() {
    let config = ResolverConfig {
        endpoint: "http://127.0.0.1:1/finance/converter".to_string(),
        retry: RetryPolicy::immediate(2),
        request_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    let resolver = RateResolver::with_http(config).unwrap();

    let err = resolver.resolve("USD", "EUR").unwrap_err();

    assert!(matches!(err, FxError::Network { attempts: 2, .. }));
    assert_eq!(err.error_code(), "NETWORK_ERROR");
}
