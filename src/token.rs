use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use sha2::Sha256;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Lifetime of tokens handed out by `/getToken`.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);
/// Lifetime of tokens minted from the command line.
pub const CLI_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
pub const CLI_ROOM: &str = "bmo-room";
pub const CLI_IDENTITY: &str = "bmo-user";
pub const CLI_NAME: &str = "BMO User";

/// Media server URL plus the key pair used to sign access tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
}

/// Body of `POST /getToken`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    pub room_name: Option<String>,
    pub participant_identity: Option<String>,
    pub participant_name: Option<String>,
    pub participant_metadata: Option<String>,
    pub participant_attributes: Option<HashMap<String, String>>,
    pub room_config: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenResponse {
    pub server_url: String,
    pub participant_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    pub room_join: bool,
    pub room: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Claims {
    iss: String,
    sub: String,
    nbf: u64,
    exp: u64,
    name: String,
    metadata: String,
    attributes: HashMap<String, String>,
    video: VideoGrant,
    #[serde(skip_serializing_if = "Option::is_none")]
    room_config: Option<Value>,
}

/// Room-join access token, signed HS256.
#[derive(Debug, Clone)]
pub struct AccessToken {
    identity: String,
    name: String,
    metadata: String,
    attributes: HashMap<String, String>,
    ttl: Duration,
    grant: Option<VideoGrant>,
    room_config: Option<Value>,
}

impl AccessToken {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            name: String::new(),
            metadata: String::new(),
            attributes: HashMap::new(),
            ttl: DEFAULT_TTL,
            grant: None,
            room_config: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = metadata.into();
        self
    }

    pub fn attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn join_room(mut self, room: impl Into<String>) -> Self {
        self.grant = Some(VideoGrant {
            room_join: true,
            room: room.into(),
        });
        self
    }

    pub fn room_config(mut self, config: Value) -> Self {
        self.room_config = Some(normalize_room_config(config));
        self
    }

    /// Sign with `creds`, valid from `now` for the configured TTL.
    pub fn to_jwt(&self, creds: &Credentials, now: SystemTime) -> Result<String> {
        let grant = self
            .grant
            .clone()
            .context("access token has no room grant")?;
        let nbf = now
            .duration_since(UNIX_EPOCH)
            .context("system clock is before the unix epoch")?
            .as_secs();
        let claims = Claims {
            iss: creds.api_key.clone(),
            sub: self.identity.clone(),
            nbf,
            exp: nbf + self.ttl.as_secs(),
            name: self.name.clone(),
            metadata: self.metadata.clone(),
            attributes: self.attributes.clone(),
            video: grant,
            room_config: self.room_config.clone(),
        };

        let header = json!({ "alg": "HS256", "typ": "JWT" });
        let b64 = &general_purpose::URL_SAFE_NO_PAD;
        let signing_input = format!(
            "{}.{}",
            b64.encode(serde_json::to_vec(&header)?),
            b64.encode(serde_json::to_vec(&claims)?)
        );

        type HmacSha256 = Hmac<Sha256>;
        let mut mac = <HmacSha256 as Mac>::new_from_slice(creds.api_secret.as_bytes())
            .context("invalid signing key")?;
        mac.update(signing_input.as_bytes());
        let signature = b64.encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}", signing_input, signature))
    }
}

/// Clients send agent dispatch entries in snake_case; tokens carry camelCase.
pub fn normalize_room_config(config: Value) -> Value {
    let Value::Object(mut map) = config else {
        return config;
    };
    if let Some(Value::Array(agents)) = map.remove("agents") {
        let agents = agents
            .into_iter()
            .map(|agent| {
                let field = |key: &str| {
                    agent
                        .get(key)
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                };
                let mut out = Map::new();
                out.insert(
                    "agentName".into(),
                    Value::String(field("agent_name").or_else(|| field("agentName")).unwrap_or_default()),
                );
                out.insert("metadata".into(), Value::String(field("metadata").unwrap_or_default()));
                Value::Object(out)
            })
            .collect();
        map.insert("agents".into(), Value::Array(agents));
    }
    Value::Object(map)
}

fn random_identity() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .filter_map(|_| std::char::from_digit(rng.gen_range(0..36), 36))
        .collect();
    format!("user-{}", suffix)
}

fn default_room(now: SystemTime) -> String {
    let ms = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("room-{}", ms)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Handle a `/getToken` request body.
pub fn issue(req: TokenRequest, creds: &Credentials, now: SystemTime) -> Result<TokenResponse> {
    let room = non_empty(req.room_name).unwrap_or_else(|| default_room(now));
    let identity = non_empty(req.participant_identity).unwrap_or_else(random_identity);
    let name = non_empty(req.participant_name).unwrap_or_else(|| "User".to_string());

    let mut token = AccessToken::new(identity)
        .name(name)
        .metadata(req.participant_metadata.unwrap_or_default())
        .attributes(req.participant_attributes.unwrap_or_default())
        .ttl(DEFAULT_TTL)
        .join_room(room);
    if let Some(config) = req.room_config {
        token = token.room_config(config);
    }

    Ok(TokenResponse {
        server_url: creds.url.clone(),
        participant_token: token.to_jwt(creds, now)?,
    })
}

/// Long-lived token for a fixed room, as minted by `bmo token create`.
pub fn cli_token(
    creds: &Credentials,
    room: &str,
    identity: &str,
    name: &str,
    ttl: Duration,
) -> Result<String> {
    AccessToken::new(identity)
        .name(name)
        .ttl(ttl)
        .join_room(room)
        .to_jwt(creds, SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials {
            url: "wss://bmo.example.livekit.cloud".into(),
            api_key: "APIkey".into(),
            api_secret: "secret-that-is-long-enough".into(),
        }
    }

    fn decode_claims(jwt: &str) -> Value {
        let parts: Vec<&str> = jwt.split('.').collect();
        assert_eq!(parts.len(), 3);
        let body = general_purpose::URL_SAFE_NO_PAD.decode(parts[1]).unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn signature_verifies_with_secret() {
        let jwt = AccessToken::new("alice")
            .join_room("r1")
            .to_jwt(&creds(), SystemTime::now())
            .unwrap();
        let (input, sig) = jwt.rsplit_once('.').unwrap();
        let sig = general_purpose::URL_SAFE_NO_PAD.decode(sig).unwrap();

        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(b"secret-that-is-long-enough").unwrap();
        mac.update(input.as_bytes());
        assert!(mac.verify_slice(&sig).is_ok());

        let header: Value = serde_json::from_slice(
            &general_purpose::URL_SAFE_NO_PAD
                .decode(input.split('.').next().unwrap())
                .unwrap(),
        )
        .unwrap();
        assert_eq!(header["alg"], "HS256");
    }

    #[test]
    fn request_defaults() {
        let now = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        let resp = issue(TokenRequest::default(), &creds(), now).unwrap();
        assert_eq!(resp.server_url, "wss://bmo.example.livekit.cloud");

        let claims = decode_claims(&resp.participant_token);
        assert_eq!(claims["iss"], "APIkey");
        assert_eq!(claims["name"], "User");
        assert_eq!(claims["metadata"], "");
        assert_eq!(claims["video"]["roomJoin"], true);
        assert_eq!(claims["video"]["room"], "room-1700000000123");
        assert_eq!(claims["nbf"], 1_700_000_000u64);
        assert_eq!(claims["exp"], 1_700_000_600u64);
        assert!(claims.get("roomConfig").is_none());

        let sub = claims["sub"].as_str().unwrap();
        let suffix = sub.strip_prefix("user-").unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn request_fields_and_agent_rewrite() {
        let req: TokenRequest = serde_json::from_value(json!({
            "room_name": "kitchen",
            "participant_identity": "finn",
            "participant_name": "Finn",
            "participant_metadata": "{\"age\":14}",
            "participant_attributes": {"hat": "bear"},
            "room_config": {
                "agents": [{"agent_name": "bmo"}, {"agentName": "jake", "metadata": "m"}],
                "emptyTimeout": 30
            }
        }))
        .unwrap();
        let resp = issue(req, &creds(), SystemTime::now()).unwrap();
        let claims = decode_claims(&resp.participant_token);

        assert_eq!(claims["sub"], "finn");
        assert_eq!(claims["name"], "Finn");
        assert_eq!(claims["attributes"]["hat"], "bear");
        assert_eq!(claims["video"]["room"], "kitchen");
        assert_eq!(
            claims["roomConfig"]["agents"],
            json!([
                {"agentName": "bmo", "metadata": ""},
                {"agentName": "jake", "metadata": "m"}
            ])
        );
        assert_eq!(claims["roomConfig"]["emptyTimeout"], 30);
    }

    #[test]
    fn cli_token_is_long_lived() {
        let jwt = cli_token(&creds(), CLI_ROOM, CLI_IDENTITY, CLI_NAME, CLI_TTL).unwrap();
        let claims = decode_claims(&jwt);
        assert_eq!(claims["sub"], "bmo-user");
        assert_eq!(claims["video"]["room"], "bmo-room");
        let lifetime = claims["exp"].as_u64().unwrap() - claims["nbf"].as_u64().unwrap();
        assert_eq!(lifetime, 30 * 24 * 3600);
    }

    #[test]
    fn token_without_grant_is_an_error() {
        assert!(AccessToken::new("x").to_jwt(&creds(), SystemTime::now()).is_err());
    }
}
