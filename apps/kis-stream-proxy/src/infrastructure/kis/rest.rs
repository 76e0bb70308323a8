//! KIS REST Ranking Adapter
//!
//! Fetches the domestic fluctuation (percent change) ranking.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer};

use crate::application::ports::{AccessTokenProvider, RankingError, RankingSource};
use crate::domain::ranking::RankEntry;
use crate::infrastructure::config::AppCredentials;
use crate::infrastructure::kis::codec::parse_number;
use crate::infrastructure::kis::messages::CUSTOMER_TYPE;

const FLUCTUATION_PATH: &str = "/uapi/domestic-stock/v1/ranking/fluctuation";
const FLUCTUATION_TR_ID: &str = "FHPST01700000";

/// Query for the top risers across the whole market, ranked by change
/// versus the prior close.
const FLUCTUATION_QUERY: [(&str, &str); 14] = [
    ("fid_rsfl_rate2", ""),
    ("fid_cond_mrkt_div_code", "J"),
    ("fid_cond_scr_div_code", "20170"),
    ("fid_input_iscd", "0000"),
    ("fid_rank_sort_cls_code", "0"),
    ("fid_input_cnt_1", "0"),
    ("fid_prc_cls_code", "1"),
    ("fid_input_price_1", ""),
    ("fid_input_price_2", ""),
    ("fid_vol_cnt", ""),
    ("fid_trgt_cls_code", "0"),
    ("fid_trgt_exls_cls_code", "0"),
    ("fid_div_cls_code", "0"),
    ("fid_rsfl_rate1", ""),
];

#[derive(Debug, Deserialize)]
struct RankResponse {
    rt_cd: Option<String>,
    msg_cd: Option<String>,
    msg1: Option<String>,
    #[serde(default)]
    output: Vec<RankItem>,
}

#[derive(Debug, Deserialize)]
struct RankItem {
    #[serde(default, alias = "mksc_shrn_iscd", deserialize_with = "lenient_string")]
    stck_shrt_cd: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    hts_kor_isnm: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    prdy_ctrt: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    stck_prpr: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    data_rank: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    acml_vol: Option<String>,
}

/// Accepts a string, a number, or null.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl RankItem {
    fn into_entry(self) -> Option<RankEntry> {
        let symbol = self.stck_shrt_cd.filter(|s| !s.trim().is_empty())?;
        Some(RankEntry {
            symbol: symbol.trim().to_string(),
            name: self.hts_kor_isnm.unwrap_or_default(),
            change_rate: self.prdy_ctrt.as_deref().and_then(parse_number),
            price: self.stck_prpr.as_deref().and_then(parse_number),
            rank: self.data_rank.as_deref().and_then(|r| r.trim().parse().ok()),
            volume: self.acml_vol.as_deref().and_then(parse_number),
        })
    }
}

/// REST client for ranking queries.
pub struct KisRestClient {
    client: Client,
    base_url: String,
    credentials: AppCredentials,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl KisRestClient {
    /// Create a client against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        credentials: AppCredentials,
        tokens: Arc<dyn AccessTokenProvider>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            tokens,
        })
    }
}

#[async_trait]
impl RankingSource for KisRestClient {
    async fn fluctuation_rank(&self) -> Result<Option<Vec<RankEntry>>, RankingError> {
        let Some(token) = self.tokens.access_token().await else {
            tracing::warn!("Access token unavailable, skipping ranking fetch");
            return Ok(None);
        };

        let body = self
            .client
            .get(format!("{}{FLUCTUATION_PATH}", self.base_url))
            .header("content-type", "application/json; charset=utf-8")
            .header("authorization", format!("Bearer {}", token.token()))
            .header("appkey", self.credentials.app_key())
            .header("appsecret", self.credentials.app_secret())
            .header("tr_id", FLUCTUATION_TR_ID)
            .header("custtype", CUSTOMER_TYPE)
            .query(&FLUCTUATION_QUERY)
            .send()
            .await?
            .text()
            .await?;

        let response: RankResponse = serde_json::from_str(&body)?;

        if response.rt_cd.as_deref() != Some("0") {
            tracing::warn!(
                rt_cd = ?response.rt_cd,
                msg_cd = ?response.msg_cd,
                msg = ?response.msg1,
                "Fluctuation rank rejected"
            );
            return Ok(None);
        }

        Ok(Some(
            response
                .output
                .into_iter()
                .filter_map(RankItem::into_entry)
                .collect(),
        ))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockAccessTokenProvider;
    use crate::domain::auth::AccessToken;
    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tokens(token: Option<&'static str>) -> Arc<dyn AccessTokenProvider> {
        let mut provider = MockAccessTokenProvider::new();
        provider.expect_access_token().returning(move || {
            token.map(|t| AccessToken::new(t, Utc::now() + chrono::Duration::hours(1)))
        });
        Arc::new(provider)
    }

    async fn setup(token: Option<&'static str>) -> (MockServer, KisRestClient) {
        let server = MockServer::start().await;
        let client = KisRestClient::new(
            server.uri(),
            AppCredentials::new("app-key".to_string(), "app-secret".to_string()),
            tokens(token),
            Duration::from_secs(5),
        )
        .unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn fluctuation_rank_success() {
        let (server, client) = setup(Some("tok")).await;

        Mock::given(method("GET"))
            .and(path(FLUCTUATION_PATH))
            .and(header("authorization", "Bearer tok"))
            .and(header("appkey", "app-key"))
            .and(header("tr_id", "FHPST01700000"))
            .and(header("custtype", "P"))
            .and(query_param("fid_cond_mrkt_div_code", "J"))
            .and(query_param("fid_cond_scr_div_code", "20170"))
            .and(query_param("fid_prc_cls_code", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rt_cd": "0",
                "msg_cd": "MCA00000",
                "msg1": "OK",
                "output": [
                    {"stck_shrt_cd": "005930", "hts_kor_isnm": "삼성전자", "prdy_ctrt": "29.95",
                     "stck_prpr": "70000", "data_rank": "1", "acml_vol": "1234567"},
                    {"mksc_shrn_iscd": "000660", "hts_kor_isnm": "SK하이닉스", "prdy_ctrt": "12.1",
                     "stck_prpr": 150000, "data_rank": "2", "acml_vol": ""},
                    {"stck_shrt_cd": "", "hts_kor_isnm": "blank"}
                ]
            })))
            .mount(&server)
            .await;

        let entries = client.fluctuation_rank().await.unwrap().unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].symbol, "005930");
        assert_eq!(entries[0].name, "삼성전자");
        assert_eq!(entries[0].change_rate, Some(29.95));
        assert_eq!(entries[0].rank, Some(1));
        assert_eq!(entries[1].symbol, "000660");
        assert_eq!(entries[1].price, Some(150_000.0));
        assert_eq!(entries[1].volume, None);
    }

    #[tokio::test]
    async fn error_code_is_none() {
        let (server, client) = setup(Some("tok")).await;

        Mock::given(method("GET"))
            .and(path(FLUCTUATION_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rt_cd": "1",
                "msg_cd": "EGW00201",
                "msg1": "초당 거래건수를 초과하였습니다."
            })))
            .mount(&server)
            .await;

        assert!(client.fluctuation_rank().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_token_skips_request() {
        let (server, client) = setup(None).await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        assert!(client.fluctuation_rank().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let (server, client) = setup(Some("tok")).await;

        Mock::given(method("GET"))
            .and(path(FLUCTUATION_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        assert!(matches!(
            client.fluctuation_rank().await,
            Err(RankingError::Decode(_))
        ));
    }
}
