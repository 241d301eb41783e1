//! 5paisa brokerage adapter.
//!
//! Login is a two-step TOTP handshake (`TOTPLogin` yields a request token,
//! `GetAccessToken` exchanges it for a bearer token). Historical candles come
//! from the V2 historical endpoint, which caps one request at roughly 175
//! days of intraday data and takes inclusive calendar dates.

use super::provider::{CandleProvider, FetchError, FetchRequest};
use super::session::{AuthError, Authenticator, Credentials, Session};
use crate::domain::{parse_timestamp, Candle, Interval, Series, DEFAULT_MAX_CHUNK_DAYS};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;

pub const LOGIN_BASE_URL: &str = "https://Openapi.5paisa.com/VendorsAPI/Service1.svc";
pub const DATA_BASE_URL: &str = "https://openapi.5paisa.com";

fn http_client() -> Result<reqwest::blocking::Client, reqwest::Error> {
    reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
}

// ── Login wire types ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct LoginEnvelope<T> {
    body: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TotpLoginBody {
    #[serde(default)]
    request_token: Option<String>,
    #[serde(default)]
    status: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccessTokenBody {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    client_code: Option<String>,
    #[serde(default)]
    status: i64,
    #[serde(default)]
    message: String,
}

/// Performs the TOTP login handshake.
pub struct FivePaisaAuthenticator {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl FivePaisaAuthenticator {
    pub fn new() -> Result<Self, AuthError> {
        Self::with_base_url(LOGIN_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, AuthError> {
        let client = http_client().map_err(|e| AuthError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn post<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        payload: serde_json::Value,
    ) -> Result<T, AuthError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AuthError::Rejected(format!("{endpoint}: HTTP {status}")));
        }
        let envelope: LoginEnvelope<T> = resp
            .json()
            .map_err(|e| AuthError::ResponseFormat(format!("{endpoint}: {e}")))?;
        Ok(envelope.body)
    }
}

impl Authenticator for FivePaisaAuthenticator {
    fn authenticate(&self, credentials: &Credentials, otp: &str) -> Result<Session, AuthError> {
        credentials.validate()?;
        if otp.trim().is_empty() {
            return Err(AuthError::MissingCredential("totp"));
        }

        let login: TotpLoginBody = self.post(
            "TOTPLogin",
            json!({
                "head": { "Key": credentials.user_key },
                "body": {
                    "Email_ID": credentials.client_code,
                    "TOTP": otp.trim(),
                    "PIN": credentials.pin,
                }
            }),
        )?;
        let request_token = match login.request_token {
            Some(t) if login.status == 0 && !t.is_empty() => t,
            _ => return Err(AuthError::Rejected(non_empty(login.message, "TOTP rejected"))),
        };

        let access: AccessTokenBody = self.post(
            "GetAccessToken",
            json!({
                "head": { "Key": credentials.user_key },
                "body": {
                    "RequestToken": request_token,
                    "EncryKey": credentials.encryption_key,
                    "UserId": credentials.user_id,
                }
            }),
        )?;
        let access_token = match access.access_token {
            Some(t) if access.status == 0 && !t.is_empty() => t,
            _ => {
                return Err(AuthError::Rejected(non_empty(
                    access.message,
                    "access token not issued",
                )))
            }
        };

        let client_code = access
            .client_code
            .unwrap_or_else(|| credentials.client_code.clone());
        tracing::info!(client_code = %client_code, "logged in to 5paisa");
        Ok(Session::new(access_token, client_code, Utc::now()))
    }
}

fn non_empty(message: String, fallback: &str) -> String {
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message
    }
}

// ── Historical data ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct HistoricalResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
    data: Option<HistoricalData>,
}

#[derive(Debug, Deserialize)]
struct HistoricalData {
    #[serde(default)]
    candles: Vec<(String, f64, f64, f64, f64, f64)>,
}

/// Historical candles from 5paisa for an authenticated session.
pub struct FivePaisaProvider {
    client: reqwest::blocking::Client,
    session: Session,
    base_url: String,
    max_chunk: Duration,
}

impl FivePaisaProvider {
    pub fn new(session: Session) -> Result<Self, FetchError> {
        Self::with_base_url(session, DATA_BASE_URL)
    }

    pub fn with_base_url(session: Session, base_url: impl Into<String>) -> Result<Self, FetchError> {
        let client = http_client().map_err(FetchError::from_reqwest)?;
        Ok(Self {
            client,
            session,
            base_url: base_url.into(),
            max_chunk: Duration::days(DEFAULT_MAX_CHUNK_DAYS),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Whether the session can still be used.
    pub fn is_session_valid(&self) -> bool {
        self.session.is_valid()
    }

    fn historical_url(&self, request: &FetchRequest<'_>) -> String {
        let window = request.window;
        // `end` is inclusive on the wire, the window is half-open
        let last_day = (window.end() - Duration::seconds(1)).date();
        format!(
            "{}/V2/historical/{}/{}/{}/{}?from={}&end={}",
            self.base_url,
            request.exchange.code,
            request.exchange.segment,
            request.provider_id,
            window.interval().as_code(),
            window.start().date().format("%Y-%m-%d"),
            last_day.format("%Y-%m-%d"),
        )
    }

    fn parse_response(interval: Interval, resp: HistoricalResponse) -> Result<Series, FetchError> {
        let status_ok = resp.status.is_empty() || resp.status.eq_ignore_ascii_case("success");
        let data = match resp.data {
            Some(data) if status_ok => data,
            _ => {
                return Err(FetchError::Provider {
                    message: resp
                        .message
                        .unwrap_or_else(|| format!("status '{}' with no data", resp.status)),
                })
            }
        };

        let mut candles = Vec::with_capacity(data.candles.len());
        for (ts, open, high, low, close, volume) in data.candles {
            let timestamp = parse_timestamp(&ts)
                .ok_or_else(|| FetchError::ResponseFormat(format!("invalid timestamp: {ts}")))?;
            candles.push(Candle {
                timestamp,
                open,
                high,
                low,
                close,
                volume,
            });
        }
        Ok(Series::new(interval.granularity(), candles))
    }
}

impl CandleProvider for FivePaisaProvider {
    fn name(&self) -> &str {
        "5paisa"
    }

    fn fetch_candles(&self, request: &FetchRequest<'_>) -> Result<Series, FetchError> {
        if !self.is_session_valid() {
            return Err(FetchError::SessionExpired);
        }

        let url = self.historical_url(request);
        let resp = self
            .client
            .get(&url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("bearer {}", self.session.access_token()),
            )
            .send()
            .map_err(FetchError::from_reqwest)?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(FetchError::SessionExpired);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited {
                retry_after_secs: retry_after(&resp).unwrap_or(60),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                body: resp.text().unwrap_or_default(),
            });
        }

        let body: HistoricalResponse = resp.json().map_err(|e| {
            FetchError::ResponseFormat(format!(
                "failed to parse response for scrip {}: {e}",
                request.provider_id
            ))
        })?;
        Self::parse_response(request.window.interval(), body)
    }

    fn max_window(&self, _interval: Interval) -> Option<Duration> {
        Some(self.max_chunk)
    }
}

pub(crate) fn retry_after(resp: &reqwest::blocking::Response) -> Option<u64> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::Exchange;
    use crate::domain::FetchWindow;
    use chrono::NaiveDate;

    fn provider() -> FivePaisaProvider {
        let session = Session::new("tok".into(), "123".into(), Utc::now());
        FivePaisaProvider::with_base_url(session, "http://localhost").unwrap()
    }

    #[test]
    fn url_uses_inclusive_end_date() {
        let window = FetchWindow::from_dates(
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 6, 25).unwrap(),
            Interval::Minute15,
        )
        .unwrap();
        let req = FetchRequest {
            provider_id: "2885",
            exchange: Exchange::default(),
            window,
        };
        assert_eq!(
            provider().historical_url(&req),
            "http://localhost/V2/historical/N/C/2885/15m?from=2023-01-01&end=2023-06-24"
        );
    }

    #[test]
    fn parses_candle_rows() {
        let raw = r#"{
            "status": "success",
            "data": {"candles": [
                ["2023-01-02T09:30:00", 2552.0, 2556.0, 2549.5, 2551.0, 40210],
                ["2023-01-02T09:15:00", 2550.0, 2565.5, 2541.1, 2552.0, 183422]
            ]}
        }"#;
        let resp: HistoricalResponse = serde_json::from_str(raw).unwrap();
        let series = FivePaisaProvider::parse_response(Interval::Minute15, resp).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.candles()[0].close, 2552.0);
        assert_eq!(series.candles()[0].volume, 183_422.0);
    }

    #[test]
    fn error_status_maps_to_provider_error() {
        let raw = r#"{"status": "error", "message": "Invalid ScripCode"}"#;
        let resp: HistoricalResponse = serde_json::from_str(raw).unwrap();
        let err = FivePaisaProvider::parse_response(Interval::Day1, resp).unwrap_err();
        assert!(matches!(err, FetchError::Provider { message } if message == "Invalid ScripCode"));
    }

    #[test]
    fn expired_session_short_circuits() {
        let issued = Utc::now() - Duration::days(2);
        let session = Session::new("tok".into(), "123".into(), issued);
        let p = FivePaisaProvider::with_base_url(session, "http://localhost").unwrap();
        let window = FetchWindow::from_dates(
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(),
            Interval::Day1,
        )
        .unwrap();
        let req = FetchRequest {
            provider_id: "2885",
            exchange: Exchange::default(),
            window,
        };
        assert!(matches!(p.fetch_candles(&req), Err(FetchError::SessionExpired)));
    }

    #[test]
    fn authenticate_requires_totp() {
        let auth = FivePaisaAuthenticator::with_base_url("http://localhost").unwrap();
        let creds = Credentials {
            user_key: "k".into(),
            user_id: "u".into(),
            encryption_key: "e".into(),
            client_code: "c".into(),
            pin: "1".into(),
            ..Default::default()
        };
        assert!(matches!(
            auth.authenticate(&creds, "  "),
            Err(AuthError::MissingCredential("totp"))
        ));
    }
}
