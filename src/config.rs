use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub mongodb_uri: String,
    pub database_name: String,
    pub jwt: JwtConfig,
    pub reset_token_ttl_minutes: i64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mongodb_uri = std::env::var("MONGODB_URI")?;
        let database_name =
            std::env::var("DATABASE_NAME").unwrap_or_else(|_| "ShomvobTravels".into());
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "shomvob".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "shomvob-clients".into()),
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60),
        };
        let reset_token_ttl_minutes = std::env::var("RESET_TOKEN_TTL_MINUTES")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(60);
        Ok(Self {
            mongodb_uri,
            database_name,
            jwt,
            reset_token_ttl_minutes,
        })
    }

    /// Fixed configuration for unit tests; no environment access.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            mongodb_uri: "mongodb://localhost:27017".into(),
            database_name: "ShomvobTravelsTest".into(),
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
            },
            reset_token_ttl_minutes: 60,
        }
    }
}
