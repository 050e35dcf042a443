//! Static endpoint registry.
//!
//! Paths, methods, security types and weights mirror the exchange's
//! published API version and change only when that version does.

use cryptobot_brokers_common::{ClientError, HttpMethod};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Logical client group. Each group gets its own sub-client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientGroup {
    Wallet,
    MarketData,
    SpotAccountTrade,
    UserDataStream,
}

impl ClientGroup {
    pub const ALL: [ClientGroup; 4] = [
        ClientGroup::Wallet,
        ClientGroup::MarketData,
        ClientGroup::SpotAccountTrade,
        ClientGroup::UserDataStream,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientGroup::Wallet => "wallet",
            ClientGroup::MarketData => "market_data",
            ClientGroup::SpotAccountTrade => "spot_account_trade",
            ClientGroup::UserDataStream => "user_data_stream",
        }
    }
}

impl fmt::Display for ClientGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Endpoint security type, as the exchange documents it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityType {
    None,
    Trade,
    UserData,
    UserStream,
    MarketData,
}

/// What a request must carry to pass an endpoint's security check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityPolicy {
    pub requires_api_key: bool,
    pub requires_signature: bool,
}

impl SecurityType {
    pub fn policy(&self) -> SecurityPolicy {
        let (requires_api_key, requires_signature) = match self {
            SecurityType::None => (false, false),
            SecurityType::Trade | SecurityType::UserData => (true, true),
            SecurityType::UserStream | SecurityType::MarketData => (true, false),
        };
        SecurityPolicy {
            requires_api_key,
            requires_signature,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub name: &'static str,
    pub group: ClientGroup,
    /// Absolute path, possibly with `{var}` placeholders.
    pub path: &'static str,
    pub method: HttpMethod,
    pub security: SecurityType,
    /// Nominal request weight.
    pub weight: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    // Wallet
    SystemStatus,
    AllCoinsInformation,
    DailyAccountSnapshot,
    DisableFastWithdrawSwitch,
    EnableFastWithdrawSwitch,
    WithdrawSapi,
    WithdrawWapi,
    DepositHistorySapi,
    DepositHistoryWapi,
    WithdrawHistorySapi,
    WithdrawHistoryWapi,
    DepositAddressSapi,
    DepositAddressWapi,
    AccountStatus,
    AccountApiTradingStatus,
    Dustlog,
    AssetDividendRecord,
    AssetDetail,
    TradeFee,

    // Market data
    TestConnectivity,
    CheckServerTime,
    ExchangeInformation,
    OrderBook,
    RecentTradesList,
    OldTradeLookup,
    CompressedAggregateTradesList,
    KlineCandlestickData,
    CurrentAveragePrice,
    Ticker24hr,
    SymbolPriceTicker,
    SymbolOrderBookTicker,

    // Spot account/trade
    TestNewOrder,
    NewOrder,
    CancelOrder,
    CancelAllOpenOrders,
    QueryOrder,
    CurrentOpenOrders,
    AllOrders,
    AccountInformation,
    AccountTradeList,

    // User data stream
    CreateListenKey,
    KeepaliveListenKey,
    CloseListenKey,
}

impl Endpoint {
    pub const ALL: &'static [Endpoint] = &[
        Endpoint::SystemStatus,
        Endpoint::AllCoinsInformation,
        Endpoint::DailyAccountSnapshot,
        Endpoint::DisableFastWithdrawSwitch,
        Endpoint::EnableFastWithdrawSwitch,
        Endpoint::WithdrawSapi,
        Endpoint::WithdrawWapi,
        Endpoint::DepositHistorySapi,
        Endpoint::DepositHistoryWapi,
        Endpoint::WithdrawHistorySapi,
        Endpoint::WithdrawHistoryWapi,
        Endpoint::DepositAddressSapi,
        Endpoint::DepositAddressWapi,
        Endpoint::AccountStatus,
        Endpoint::AccountApiTradingStatus,
        Endpoint::Dustlog,
        Endpoint::AssetDividendRecord,
        Endpoint::AssetDetail,
        Endpoint::TradeFee,
        Endpoint::TestConnectivity,
        Endpoint::CheckServerTime,
        Endpoint::ExchangeInformation,
        Endpoint::OrderBook,
        Endpoint::RecentTradesList,
        Endpoint::OldTradeLookup,
        Endpoint::CompressedAggregateTradesList,
        Endpoint::KlineCandlestickData,
        Endpoint::CurrentAveragePrice,
        Endpoint::Ticker24hr,
        Endpoint::SymbolPriceTicker,
        Endpoint::SymbolOrderBookTicker,
        Endpoint::TestNewOrder,
        Endpoint::NewOrder,
        Endpoint::CancelOrder,
        Endpoint::CancelAllOpenOrders,
        Endpoint::QueryOrder,
        Endpoint::CurrentOpenOrders,
        Endpoint::AllOrders,
        Endpoint::AccountInformation,
        Endpoint::AccountTradeList,
        Endpoint::CreateListenKey,
        Endpoint::KeepaliveListenKey,
        Endpoint::CloseListenKey,
    ];

    pub fn descriptor(&self) -> EndpointDescriptor {
        use ClientGroup::*;
        use HttpMethod::*;

        let (name, group, path, method, security, weight) = match self {
            Endpoint::SystemStatus => ("system_status", Wallet, "/sapi/v1/system/status", Get, SecurityType::None, 1),
            Endpoint::AllCoinsInformation => ("all_coins_information", Wallet, "/sapi/v1/capital/config/getall", Get, SecurityType::UserData, 10),
            Endpoint::DailyAccountSnapshot => ("daily_account_snapshot", Wallet, "/sapi/v1/accountSnapshot", Get, SecurityType::UserData, 1),
            Endpoint::DisableFastWithdrawSwitch => ("disable_fast_withdraw_switch", Wallet, "/sapi/v1/account/disableFastWithdrawSwitch", Post, SecurityType::UserData, 0),
            Endpoint::EnableFastWithdrawSwitch => ("enable_fast_withdraw_switch", Wallet, "/sapi/v1/account/enableFastWithdrawSwitch", Post, SecurityType::UserData, 0),
            Endpoint::WithdrawSapi => ("withdraw_sapi", Wallet, "/sapi/v1/capital/withdraw/apply", Post, SecurityType::UserData, 1),
            Endpoint::WithdrawWapi => ("withdraw_wapi", Wallet, "/wapi/v3/withdraw.html", Post, SecurityType::UserData, 1),
            Endpoint::DepositHistorySapi => ("deposit_history_sapi", Wallet, "/sapi/v1/capital/deposit/hisrec", Get, SecurityType::UserData, 1),
            Endpoint::DepositHistoryWapi => ("deposit_history_wapi", Wallet, "/wapi/v3/depositHistory.html", Get, SecurityType::UserData, 1),
            Endpoint::WithdrawHistorySapi => ("withdraw_history_sapi", Wallet, "/sapi/v1/capital/withdraw/history", Get, SecurityType::UserData, 1),
            Endpoint::WithdrawHistoryWapi => ("withdraw_history_wapi", Wallet, "/wapi/v3/withdrawHistory.html", Get, SecurityType::UserData, 1),
            Endpoint::DepositAddressSapi => ("deposit_address_sapi", Wallet, "/sapi/v1/capital/deposit/address", Get, SecurityType::UserData, 1),
            Endpoint::DepositAddressWapi => ("deposit_address_wapi", Wallet, "/wapi/v3/depositAddress.html", Get, SecurityType::UserData, 1),
            Endpoint::AccountStatus => ("account_status", Wallet, "/sapi/v1/account/status", Get, SecurityType::UserData, 1),
            Endpoint::AccountApiTradingStatus => ("account_api_trading_status", Wallet, "/sapi/v1/account/apiTradingStatus", Get, SecurityType::UserData, 1),
            Endpoint::Dustlog => ("dustlog", Wallet, "/sapi/v1/asset/dribblet", Get, SecurityType::UserData, 1),
            Endpoint::AssetDividendRecord => ("asset_dividend_record", Wallet, "/sapi/v1/asset/assetDividend", Get, SecurityType::UserData, 1),
            Endpoint::AssetDetail => ("asset_detail", Wallet, "/sapi/v1/asset/assetDetail", Get, SecurityType::UserData, 1),
            Endpoint::TradeFee => ("trade_fee", Wallet, "/sapi/v1/asset/tradeFee", Get, SecurityType::UserData, 1),

            Endpoint::TestConnectivity => ("test_connectivity", MarketData, "/api/v3/ping", Get, SecurityType::None, 1),
            Endpoint::CheckServerTime => ("check_server_time", MarketData, "/api/v3/time", Get, SecurityType::None, 1),
            Endpoint::ExchangeInformation => ("exchange_information", MarketData, "/api/v3/exchangeInfo", Get, SecurityType::None, 10),
            Endpoint::OrderBook => ("order_book", MarketData, "/api/v3/depth", Get, SecurityType::None, 1),
            Endpoint::RecentTradesList => ("recent_trades_list", MarketData, "/api/v3/trades", Get, SecurityType::None, 1),
            Endpoint::OldTradeLookup => ("old_trade_lookup", MarketData, "/api/v3/historicalTrades", Get, SecurityType::MarketData, 5),
            Endpoint::CompressedAggregateTradesList => ("compressed_aggregate_trades_list", MarketData, "/api/v3/aggTrades", Get, SecurityType::None, 1),
            Endpoint::KlineCandlestickData => ("kline_candlestick_data", MarketData, "/api/v3/klines", Get, SecurityType::None, 1),
            Endpoint::CurrentAveragePrice => ("current_average_price", MarketData, "/api/v3/avgPrice", Get, SecurityType::None, 1),
            Endpoint::Ticker24hr => ("twentyfourhour_ticker_price_change_statistics", MarketData, "/api/v3/ticker/24hr", Get, SecurityType::None, 40),
            Endpoint::SymbolPriceTicker => ("symbol_price_ticker", MarketData, "/api/v3/ticker/price", Get, SecurityType::None, 2),
            Endpoint::SymbolOrderBookTicker => ("symbol_order_book_ticker", MarketData, "/api/v3/ticker/bookTicker", Get, SecurityType::None, 2),

            Endpoint::TestNewOrder => ("test_new_order", SpotAccountTrade, "/api/v3/order/test", Post, SecurityType::Trade, 1),
            Endpoint::NewOrder => ("new_order", SpotAccountTrade, "/api/v3/order", Post, SecurityType::Trade, 1),
            Endpoint::CancelOrder => ("cancel_order", SpotAccountTrade, "/api/v3/order", Delete, SecurityType::Trade, 1),
            Endpoint::CancelAllOpenOrders => ("cancel_all_open_orders", SpotAccountTrade, "/api/v3/openOrders", Delete, SecurityType::Trade, 1),
            Endpoint::QueryOrder => ("query_order", SpotAccountTrade, "/api/v3/order", Get, SecurityType::UserData, 2),
            Endpoint::CurrentOpenOrders => ("current_open_orders", SpotAccountTrade, "/api/v3/openOrders", Get, SecurityType::UserData, 3),
            Endpoint::AllOrders => ("all_orders", SpotAccountTrade, "/api/v3/allOrders", Get, SecurityType::UserData, 10),
            Endpoint::AccountInformation => ("account_information", SpotAccountTrade, "/api/v3/account", Get, SecurityType::UserData, 10),
            Endpoint::AccountTradeList => ("account_trade_list", SpotAccountTrade, "/api/v3/myTrades", Get, SecurityType::UserData, 10),

            Endpoint::CreateListenKey => ("create_listen_key", UserDataStream, "/api/v3/userDataStream", Post, SecurityType::UserStream, 1),
            Endpoint::KeepaliveListenKey => ("keepalive_listen_key", UserDataStream, "/api/v3/userDataStream", Put, SecurityType::UserStream, 1),
            Endpoint::CloseListenKey => ("close_listen_key", UserDataStream, "/api/v3/userDataStream", Delete, SecurityType::UserStream, 1),
        };

        EndpointDescriptor {
            name,
            group,
            path,
            method,
            security,
            weight,
        }
    }

    pub fn name(&self) -> &'static str {
        self.descriptor().name
    }

    pub fn group(&self) -> ClientGroup {
        self.descriptor().group
    }

    /// Resolve a logical endpoint name within one group.
    pub fn from_name(group: ClientGroup, name: &str) -> Result<Endpoint, ClientError> {
        Self::ALL
            .iter()
            .copied()
            .find(|e| {
                let d = e.descriptor();
                d.group == group && d.name == name
            })
            .ok_or_else(|| {
                ClientError::Configuration(format!(
                    "endpoint '{}' is not registered for group '{}'",
                    name, group
                ))
            })
    }

    /// Endpoints belonging to `group`.
    pub fn in_group(group: ClientGroup) -> impl Iterator<Item = Endpoint> {
        Self::ALL.iter().copied().filter(move |e| e.group() == group)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Check the registry once at startup: names unique within a group,
/// absolute paths, well-formed `{var}` placeholders.
pub fn validate_registry() -> Result<(), ClientError> {
    let mut seen = HashSet::new();
    let mut routes = HashSet::new();

    for endpoint in Endpoint::ALL {
        let d = endpoint.descriptor();
        if !seen.insert((d.group, d.name)) {
            return Err(ClientError::Configuration(format!(
                "duplicate endpoint name '{}' in group '{}'",
                d.name, d.group
            )));
        }
        if !routes.insert((d.method, d.path)) {
            return Err(ClientError::Configuration(format!(
                "endpoint '{}' duplicates route {} {}",
                d.name, d.method, d.path
            )));
        }
        if !d.path.starts_with('/') {
            return Err(ClientError::Configuration(format!(
                "endpoint '{}' has a relative path '{}'",
                d.name, d.path
            )));
        }
        template_vars(d.path)?;
    }
    Ok(())
}

/// Names of the `{var}` placeholders in a path template, in order.
pub fn template_vars(path: &str) -> Result<Vec<&str>, ClientError> {
    let mut vars = Vec::new();
    let mut rest = path;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            ClientError::Configuration(format!("unterminated placeholder in '{}'", path))
        })?;
        let name = &after[..close];
        if name.is_empty() || name.contains('{') {
            return Err(ClientError::Configuration(format!(
                "malformed placeholder in '{}'",
                path
            )));
        }
        vars.push(name);
        rest = &after[close + 1..];
    }
    if rest.contains('}') {
        return Err(ClientError::Configuration(format!(
            "unbalanced placeholder in '{}'",
            path
        )));
    }
    Ok(vars)
}
