//! Postal code providers.
//!
//! [`PostalProvider`] is the seam the aggregator talks to. [`HttpProvider`]
//! implements it for any JSON web service described by a
//! [`ProviderConfig`]; tests plug in their own implementations.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::config::{CustomFormat, ProviderConfig, ProviderFormat};
use crate::error::{LookupError, ProviderResult};
use crate::models::LookupResult;

/// One external address source.
#[async_trait]
pub trait PostalProvider: Send + Sync {
    /// Stable identifier, used as the correction source.
    fn id(&self) -> &str;

    /// Longest the aggregator waits for one answer.
    fn timeout(&self) -> Duration;

    /// Look up a canonical `NNNNN-NNN` postal code.
    async fn lookup(&self, postal_code: &str) -> ProviderResult<LookupResult>;
}

// =============================================================================
// Response shapes
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BrasilApiResponse {
    street: Option<String>,
    neighborhood: Option<String>,
    city: Option<String>,
    state: Option<String>,
}

/// ViaCEP and OpenCEP share the Correios field names.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CorreiosResponse {
    logradouro: Option<String>,
    bairro: Option<String>,
    localidade: Option<String>,
    uf: Option<String>,
    erro: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PostmonResponse {
    logradouro: Option<String>,
    bairro: Option<String>,
    cidade: Option<String>,
    estado: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BrasilAbertoResponse {
    result: Option<BrasilAbertoAddress>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BrasilAbertoAddress {
    street: Option<String>,
    district: Option<String>,
    city: Option<String>,
    state_shortname: Option<String>,
}

/// Address fields pulled out of a response, before validation.
#[derive(Debug, Default)]
struct Extracted {
    street: Option<String>,
    neighborhood: Option<String>,
    city: Option<String>,
    state: Option<String>,
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

fn decode<T: for<'de> Deserialize<'de>>(body: &Value) -> ProviderResult<T> {
    T::deserialize(body).map_err(|e| LookupError::Malformed(e.to_string()))
}

fn pointer_str(body: &Value, pointer: &str) -> Option<String> {
    match body.pointer(pointer)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn extract_custom(body: &Value, format: &CustomFormat) -> ProviderResult<Extracted> {
    if let Some(flag) = &format.not_found {
        if body.pointer(flag).is_some_and(is_truthy) {
            return Err(LookupError::NotFound);
        }
    }
    Ok(Extracted {
        street: pointer_str(body, &format.street),
        neighborhood: pointer_str(body, &format.neighborhood),
        city: pointer_str(body, &format.city),
        state: pointer_str(body, &format.state),
    })
}

fn extract(format: &ProviderFormat, body: &Value) -> ProviderResult<Extracted> {
    match format {
        ProviderFormat::BrasilApi => {
            let r: BrasilApiResponse = decode(body)?;
            Ok(Extracted {
                street: r.street,
                neighborhood: r.neighborhood,
                city: r.city,
                state: r.state,
            })
        }
        ProviderFormat::OpenCep | ProviderFormat::ViaCep => {
            let r: CorreiosResponse = decode(body)?;
            if r.erro.as_ref().is_some_and(is_truthy) {
                return Err(LookupError::NotFound);
            }
            Ok(Extracted {
                street: r.logradouro,
                neighborhood: r.bairro,
                city: r.localidade,
                state: r.uf,
            })
        }
        ProviderFormat::Postmon => {
            let r: PostmonResponse = decode(body)?;
            Ok(Extracted {
                street: r.logradouro,
                neighborhood: r.bairro,
                city: r.cidade,
                state: r.estado,
            })
        }
        ProviderFormat::BrasilAberto => {
            let r: BrasilAbertoResponse = decode(body)?;
            let a = r.result.ok_or(LookupError::NotFound)?;
            Ok(Extracted {
                street: a.street,
                neighborhood: a.district,
                city: a.city,
                state: a.state_shortname,
            })
        }
        ProviderFormat::Custom(custom) => extract_custom(body, custom),
    }
}

/// Interpret a provider's JSON body.
///
/// An answer without both city and state is not an address.
pub fn parse_response(
    provider_id: &str,
    format: &ProviderFormat,
    postal_code: &str,
    body: &Value,
) -> ProviderResult<LookupResult> {
    let e = extract(format, body)?;
    let result = LookupResult::new(
        provider_id,
        postal_code,
        e.street.unwrap_or_default(),
        e.neighborhood.unwrap_or_default(),
        e.city.unwrap_or_default(),
        e.state.unwrap_or_default(),
    );
    if result.city.is_empty() || result.state.is_empty() {
        return Err(LookupError::Malformed("missing city or state".to_string()));
    }
    Ok(result)
}

// =============================================================================
// HTTP provider
// =============================================================================

/// A JSON web service queried with `GET`.
pub struct HttpProvider {
    config: ProviderConfig,
    client: reqwest::Client,
    timeout: Duration,
    credential: Option<String>,
}

impl HttpProvider {
    /// `default_timeout` applies unless the provider sets its own.
    pub fn new(config: ProviderConfig, client: reqwest::Client, default_timeout: Duration) -> Self {
        let timeout = config
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(default_timeout);
        let credential = config.credential();
        Self {
            config,
            client,
            timeout,
            credential,
        }
    }
}

#[async_trait]
impl PostalProvider for HttpProvider {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn lookup(&self, postal_code: &str) -> ProviderResult<LookupResult> {
        let mut request = self
            .client
            .get(self.config.url_for(postal_code))
            .timeout(self.timeout);
        if let Some(key) = &self.credential {
            request = request.header(self.config.auth_header.as_str(), key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                LookupError::Timeout
            } else {
                LookupError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(LookupError::NotFound);
        }
        if !status.is_success() {
            return Err(LookupError::Status(status.as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| LookupError::Malformed(e.to_string()))?;

        parse_response(&self.config.id, &self.config.format, postal_code, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn provider(base: &str, path: &str, format: ProviderFormat) -> HttpProvider {
        let config = ProviderConfig::new("test", format!("{}{}", base, path), format);
        HttpProvider::new(config, reqwest::Client::new(), Duration::from_secs(5))
    }

    #[test]
    fn test_parse_brasilapi() {
        let body = json!({
            "cep": "01310100",
            "state": "SP",
            "city": "São Paulo",
            "neighborhood": "Bela Vista",
            "street": "Avenida Paulista",
            "service": "open-cep"
        });
        let r = parse_response("brasilapi", &ProviderFormat::BrasilApi, "01310-100", &body).unwrap();
        assert_eq!(r.city, "São Paulo");
        assert_eq!(r.street, "Avenida Paulista");
        assert_eq!(r.confidence, 1.0);
    }

    #[test]
    fn test_parse_viacep_error_flag() {
        for erro in [json!(true), json!("true")] {
            let body = json!({ "erro": erro });
            let err = parse_response("viacep", &ProviderFormat::ViaCep, "00000-000", &body).unwrap_err();
            assert_eq!(err, LookupError::NotFound);
        }
    }

    #[test]
    fn test_parse_brasilaberto_nested() {
        let body = json!({
            "meta": { "currentPage": 1 },
            "result": {
                "street": "Praça da Sé",
                "district": "Sé",
                "city": "São Paulo",
                "stateShortname": "sp"
            }
        });
        let r = parse_response("ba", &ProviderFormat::BrasilAberto, "01001-000", &body).unwrap();
        assert_eq!(r.state, "SP");
        assert_eq!(r.neighborhood, "Sé");
    }

    #[test]
    fn test_parse_custom_pointers() {
        let format = ProviderFormat::Custom(CustomFormat {
            street: "/data/rua".into(),
            neighborhood: "/data/bairro".into(),
            city: "/data/cidade/nome".into(),
            state: "/data/cidade/uf".into(),
            not_found: Some("/missing".into()),
        });
        let body = json!({ "data": { "rua": "Rua A", "cidade": { "nome": "Recife", "uf": "PE" } } });
        let r = parse_response("custom", &format, "50000-000", &body).unwrap();
        assert_eq!(r.city, "Recife");
        assert_eq!(r.neighborhood, "");
        assert_eq!(r.confidence, 0.75);

        let missing = json!({ "missing": 1 });
        assert_eq!(
            parse_response("custom", &format, "50000-000", &missing).unwrap_err(),
            LookupError::NotFound
        );
    }

    #[test]
    fn test_parse_missing_city_is_malformed() {
        let body = json!({ "logradouro": "Rua B", "estado": "RJ" });
        let err = parse_response("postmon", &ProviderFormat::Postmon, "20000-000", &body).unwrap_err();
        assert!(matches!(err, LookupError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_http_lookup_success() {
        let router = Router::new().route(
            "/ws/{code}/json/",
            get(|Path(code): Path<String>| async move {
                assert_eq!(code, "01310100");
                Json(json!({
                    "logradouro": "Avenida Paulista",
                    "bairro": "Bela Vista",
                    "localidade": "São Paulo",
                    "uf": "SP"
                }))
            }),
        );
        let base = serve(router).await;
        let p = provider(&base, "/ws/{postal_code}/json/", ProviderFormat::ViaCep);

        let result = p.lookup("01310-100").await.unwrap();
        assert_eq!(result.provider_id, "test");
        assert_eq!(result.postal_code, "01310-100");
        assert_eq!(result.city, "São Paulo");
    }

    #[tokio::test]
    async fn test_http_status_mapping() {
        let router = Router::new()
            .route("/missing/{code}", get(|| async { AxumStatus::NOT_FOUND }))
            .route("/broken/{code}", get(|| async { AxumStatus::BAD_GATEWAY }))
            .route("/garbage/{code}", get(|| async { "<html>" }));
        let base = serve(router).await;

        let missing = provider(&base, "/missing/{postal_code}", ProviderFormat::BrasilApi);
        assert_eq!(missing.lookup("01310-100").await.unwrap_err(), LookupError::NotFound);

        let broken = provider(&base, "/broken/{postal_code}", ProviderFormat::BrasilApi);
        assert_eq!(broken.lookup("01310-100").await.unwrap_err(), LookupError::Status(502));

        let garbage = provider(&base, "/garbage/{postal_code}", ProviderFormat::BrasilApi);
        assert!(matches!(
            garbage.lookup("01310-100").await.unwrap_err(),
            LookupError::Malformed(_)
        ));
    }

    #[tokio::test]
    async fn test_http_timeout() {
        let router = Router::new().route(
            "/slow/{code}",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({}))
            }),
        );
        let base = serve(router).await;
        let mut config = ProviderConfig::new("slow", format!("{}/slow/{{postal_code}}", base), ProviderFormat::BrasilApi);
        config.timeout_ms = Some(100);
        let p = HttpProvider::new(config, reqwest::Client::new(), Duration::from_secs(10));

        assert_eq!(p.timeout(), Duration::from_millis(100));
        assert_eq!(p.lookup("01310-100").await.unwrap_err(), LookupError::Timeout);
    }

    #[tokio::test]
    async fn test_http_sends_credential() {
        let router = Router::new().route(
            "/cep/{code}",
            get(|headers: HeaderMap| async move {
                match headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
                    Some("s3cret") => Json(json!({ "city": "Natal", "state": "RN" })).into_response(),
                    _ => AxumStatus::UNAUTHORIZED.into_response(),
                }
            }),
        );
        let base = serve(router).await;

        std::env::set_var("POSTCHECK_TEST_PROVIDER_KEY", "s3cret");
        let mut config = ProviderConfig::new("keyed", format!("{}/cep/{{postal_code}}", base), ProviderFormat::BrasilApi);
        config.api_key_env = Some("POSTCHECK_TEST_PROVIDER_KEY".into());
        config.auth_header = "x-api-key".into();
        let p = HttpProvider::new(config, reqwest::Client::new(), Duration::from_secs(5));

        assert_eq!(p.lookup("59000-000").await.unwrap().city, "Natal");
    }
}
