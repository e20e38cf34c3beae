use crate::geometry::Coordinate;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_OPENCAGE_URL: &str = "https://api.opencagedata.com/geocode/v1/json";

#[derive(thiserror::Error, Debug)]
pub enum GeocodeError {
    #[error("geocoder api key not configured")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("rate limited")]
    RateLimited,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Address to coordinate lookup. `Ok(None)` means the service answered but
/// found nothing.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<Option<Coordinate>, GeocodeError>;
}

#[derive(Debug, Deserialize)]
struct OpenCageResponse {
    #[serde(default)]
    results: Vec<OpenCageResult>,
}

#[derive(Debug, Deserialize)]
struct OpenCageResult {
    geometry: OpenCageGeometry,
}

#[derive(Debug, Deserialize)]
struct OpenCageGeometry {
    lat: f64,
    lng: f64,
}

#[derive(Clone)]
pub struct OpenCageGeocoder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenCageGeocoder {
    pub fn new(api_key: String, base_url: String) -> Result<Self, GeocodeError> {
        if api_key.trim().is_empty() {
            return Err(GeocodeError::MissingApiKey);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GeocodeError::Http(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }
}

#[async_trait]
impl Geocoder for OpenCageGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<Coordinate>, GeocodeError> {
        let address = address.trim();
        if address.is_empty() {
            return Ok(None);
        }

        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", address),
                ("key", self.api_key.as_str()),
                ("language", "ja"),
                ("countrycode", "jp"),
                ("limit", "1"),
            ])
            .send()
            .await
            .map_err(|e| GeocodeError::Http(e.to_string()))?;

        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(GeocodeError::Unauthorized)
            }
            // OpenCage 用 402 表示额度用尽
            StatusCode::TOO_MANY_REQUESTS | StatusCode::PAYMENT_REQUIRED => {
                return Err(GeocodeError::RateLimited)
            }
            _ => {}
        }

        let status = resp.status();
        let raw = resp
            .text()
            .await
            .map_err(|e| GeocodeError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(GeocodeError::Http(format!("{} {}", status.as_u16(), raw)));
        }

        parse_response(&raw)
    }
}

/// First result of an OpenCage JSON body.
pub fn parse_response(raw: &str) -> Result<Option<Coordinate>, GeocodeError> {
    let body: OpenCageResponse = serde_json::from_str(raw)
        .map_err(|e| GeocodeError::InvalidResponse(format!("json parse failed: {e}")))?;
    let Some(first) = body.results.into_iter().next() else {
        return Ok(None);
    };
    Coordinate::validated(first.geometry.lat, first.geometry.lng)
        .map(Some)
        .map_err(|e| GeocodeError::InvalidResponse(e.to_string()))
}
