use mockito::Matcher;
use rust_decimal_macros::dec;
use tokio_test::assert_ok;

use tradepilot::api::binance::Credentials;
use tradepilot::api::{
    BinanceFutures, BinanceSpot, ExchangeError, FuturesAccount, MarketVenue, SpotAccount,
};
use tradepilot::models::OrderSide;

fn credentials() -> Option<Credentials> {
    Some(Credentials {
        api_key: "test-key".to_string(),
        secret_key: "test-secret".to_string(),
    })
}

fn signed_query(pairs: &[(&str, &str)]) -> Matcher {
    let mut matchers: Vec<Matcher> = pairs
        .iter()
        .map(|(k, v)| Matcher::UrlEncoded(k.to_string(), v.to_string()))
        .collect();
    matchers.push(Matcher::UrlEncoded("recvWindow".into(), "5000".into()));
    matchers.push(Matcher::Regex("timestamp=\\d+".into()));
    matchers.push(Matcher::Regex("signature=[0-9a-f]{64}$".into()));
    Matcher::AllOf(matchers)
}

#[tokio::test]
async fn test_spot_market_buy_is_signed_and_parses_fills() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v3/order")
        .match_header("X-MBX-APIKEY", "test-key")
        .match_query(signed_query(&[
            ("symbol", "BTCUSDT"),
            ("side", "BUY"),
            ("type", "MARKET"),
            ("quantity", "0.0005"),
            ("newOrderRespType", "FULL"),
        ]))
        .with_status(200)
        .with_body(
            r#"{"symbol":"BTCUSDT","orderId":28,"status":"FILLED","executedQty":"0.00050000",
                "fills":[{"price":"40000.00","qty":"0.00030000","commission":"0","commissionAsset":"BNB"},
                         {"price":"40010.00","qty":"0.00020000","commission":"0","commissionAsset":"BNB"}]}"#,
        )
        .create_async()
        .await;

    let client = BinanceSpot::with_base_url(&server.url(), credentials(), 5000, 100).unwrap();
    let ack = client
        .market_order("BTCUSDT", OrderSide::Buy, dec!(0.00050000))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(ack.order_id, 28);
    assert_eq!(ack.fills.len(), 2);
    assert_eq!(ack.fills[1].price, dec!(40010));
    assert_eq!(ack.fills[0].quantity, dec!(0.0003));
}

#[tokio::test]
async fn test_spot_unknown_symbol_maps_to_unknown_symbol() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/v3/exchangeInfo")
        .match_query(Matcher::UrlEncoded("symbol".into(), "FOOUSDT".into()))
        .with_status(400)
        .with_body(r#"{"code":-1121,"msg":"Invalid symbol."}"#)
        .create_async()
        .await;

    let client = BinanceSpot::with_base_url(&server.url(), None, 5000, 100).unwrap();
    let result = client.symbol_filters("FOOUSDT").await;

    assert!(matches!(result, Err(ExchangeError::UnknownSymbol(s)) if s == "FOOUSDT"));
}

#[tokio::test]
async fn test_spot_order_rejection_keeps_exchange_message() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/v3/order")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body(r#"{"code":-2010,"msg":"Account has insufficient balance for requested action."}"#)
        .create_async()
        .await;

    let client = BinanceSpot::with_base_url(&server.url(), credentials(), 5000, 100).unwrap();
    let result = client
        .market_order("BTCUSDT", OrderSide::Sell, dec!(1))
        .await;

    match result {
        Err(ExchangeError::Api { status, code, msg }) => {
            assert_eq!(status, 400);
            assert_eq!(code, -2010);
            assert!(msg.contains("insufficient balance"));
        }
        other => panic!("expected api error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_signed_call_without_credentials_sends_nothing() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v3/account")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let client = BinanceSpot::with_base_url(&server.url(), None, 5000, 100).unwrap();
    let result = client.asset_balance("BTC").await;

    assert!(matches!(result, Err(ExchangeError::MissingCredentials)));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_spot_balance_sums_free_and_locked() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/v3/account")
        .match_query(signed_query(&[]))
        .with_status(200)
        .with_body(
            r#"{"balances":[{"asset":"BTC","free":"0.00040000","locked":"0.00010000"},
                            {"asset":"USDT","free":"80.00","locked":"0.00"}]}"#,
        )
        .create_async()
        .await;

    let client = BinanceSpot::with_base_url(&server.url(), credentials(), 5000, 100).unwrap();

    assert_eq!(client.asset_balance("BTC").await.unwrap(), dec!(0.0005));
    assert_eq!(client.asset_balance("ETH").await.unwrap(), dec!(0));
}

#[tokio::test]
async fn test_spot_order_status_derives_average_price() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/v3/order")
        .match_query(signed_query(&[("symbol", "BTCUSDT"), ("orderId", "28")]))
        .with_status(200)
        .with_body(r#"{"orderId":28,"executedQty":"0.50000000","cummulativeQuoteQty":"20005.00000000"}"#)
        .create_async()
        .await;

    let client = BinanceSpot::with_base_url(&server.url(), credentials(), 5000, 100).unwrap();
    let status = client.order_status("BTCUSDT", 28).await.unwrap();

    assert_eq!(status.executed_qty, dec!(0.5));
    assert_eq!(status.avg_price, Some(dec!(40010)));
}

#[tokio::test]
async fn test_spot_transfer_to_futures() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/sapi/v1/futures/transfer")
        .match_query(signed_query(&[("asset", "USDT"), ("amount", "15"), ("type", "1")]))
        .with_status(200)
        .with_body(r#"{"tranId":100000001}"#)
        .create_async()
        .await;

    let client = BinanceSpot::with_base_url(&server.url(), credentials(), 5000, 100).unwrap();
    assert_ok!(client.transfer_to_futures("USDT", dec!(15.00)).await);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_spot_klines_oldest_first() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/v3/klines")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
            Matcher::UrlEncoded("interval".into(), "5m".into()),
            Matcher::UrlEncoded("limit".into(), "2".into()),
        ]))
        .with_status(200)
        .with_body(
            r#"[[1700000000000,"100.0","101.0","99.0","100.5","12.0",1700000299999,"0",1,"0","0","0"],
                [1700000300000,"100.5","102.0","100.0","101.5","8.0",1700000599999,"0",1,"0","0","0"]]"#,
        )
        .create_async()
        .await;

    let client = BinanceSpot::with_base_url(&server.url(), None, 5000, 100).unwrap();
    let candles = client.klines("BTCUSDT", "5m", 2).await.unwrap();

    assert_eq!(candles.len(), 2);
    assert!(candles[0].open_time < candles[1].open_time);
    assert_eq!(candles[1].close, 101.5);
}

#[tokio::test]
async fn test_futures_position_risk_parsing() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/fapi/v2/positionRisk")
        .match_query(signed_query(&[("symbol", "ETHUSDT")]))
        .with_status(200)
        .with_body(
            r#"[{"symbol":"ETHUSDT","positionAmt":"-0.050","entryPrice":"2000.0","markPrice":"1990.00000000",
                 "unRealizedProfit":"0.50000000","leverage":"10","positionSide":"BOTH"}]"#,
        )
        .create_async()
        .await;

    let client = BinanceFutures::with_base_url(&server.url(), credentials(), 5000, 100).unwrap();
    let info = client.position_info("ETHUSDT").await.unwrap();

    assert_eq!(info.position_amt, dec!(-0.05));
    assert_eq!(info.entry_price, dec!(2000));
    assert_eq!(info.mark_price, dec!(1990));
    assert_eq!(info.unrealized_pnl, dec!(0.5));
}

#[tokio::test]
async fn test_futures_missing_position_row_means_flat() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/fapi/v2/positionRisk")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;

    let client = BinanceFutures::with_base_url(&server.url(), credentials(), 5000, 100).unwrap();
    let info = client.position_info("ETHUSDT").await.unwrap();

    assert!(info.position_amt.is_zero());
}

#[tokio::test]
async fn test_futures_order_ack_has_no_fills_and_status_reads_avg() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/fapi/v1/order")
        .match_query(signed_query(&[
            ("symbol", "ETHUSDT"),
            ("side", "SELL"),
            ("type", "MARKET"),
            ("quantity", "0.05"),
        ]))
        .with_status(200)
        .with_body(r#"{"orderId":8389765,"status":"NEW","avgPrice":"0.00000"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/fapi/v1/order")
        .match_query(signed_query(&[("symbol", "ETHUSDT"), ("orderId", "8389765")]))
        .with_status(200)
        .with_body(r#"{"orderId":8389765,"avgPrice":"1999.50","executedQty":"0.050"}"#)
        .create_async()
        .await;

    let client = BinanceFutures::with_base_url(&server.url(), credentials(), 5000, 100).unwrap();
    let ack = client
        .market_order("ETHUSDT", OrderSide::Sell, dec!(0.050))
        .await
        .unwrap();
    assert_eq!(ack.order_id, 8389765);
    assert!(ack.fills.is_empty());

    let status = client.order_status("ETHUSDT", ack.order_id).await.unwrap();
    assert_eq!(status.avg_price, Some(dec!(1999.5)));
}

#[tokio::test]
async fn test_futures_available_balance_and_leverage() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/fapi/v2/balance")
        .match_query(signed_query(&[]))
        .with_status(200)
        .with_body(
            r#"[{"accountAlias":"x","asset":"USDT","balance":"120.0","availableBalance":"95.25"}]"#,
        )
        .create_async()
        .await;
    let leverage = server
        .mock("POST", "/fapi/v1/leverage")
        .match_query(signed_query(&[("symbol", "ETHUSDT"), ("leverage", "10")]))
        .with_status(200)
        .with_body(r#"{"leverage":10,"maxNotionalValue":"1000000","symbol":"ETHUSDT"}"#)
        .create_async()
        .await;

    let client = BinanceFutures::with_base_url(&server.url(), credentials(), 5000, 100).unwrap();

    assert_eq!(client.available_balance("USDT").await.unwrap(), dec!(95.25));
    assert_ok!(client.set_leverage("ETHUSDT", 10).await);
    leverage.assert_async().await;
}
