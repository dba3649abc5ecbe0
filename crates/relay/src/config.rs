use std::net::SocketAddr;

use chat_core::protocol::DEFAULT_SYSTEM_PROMPT;
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "aichat-relay", about = "Chat relay to an OpenAI-compatible completions API")]
pub struct RelayArgs {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1:8787", env = "RELAY_ADDR")]
    pub addr: SocketAddr,

    /// System prompt placed before every conversation
    #[arg(long, default_value = DEFAULT_SYSTEM_PROMPT, env = "RELAY_SYSTEM_PROMPT")]
    pub system_prompt: String,

    /// Model used when a request names none (defaults to the provider config)
    #[arg(long, env = "RELAY_DEFAULT_MODEL")]
    pub default_model: Option<String>,

    /// Emit JSON log lines
    #[arg(long, env = "RELAY_LOG_JSON")]
    pub log_json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let args = RelayArgs::try_parse_from(["aichat-relay"]).unwrap();
        assert_eq!(args.addr.port(), 8787);
        assert_eq!(args.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert!(args.default_model.is_none());
    }

    #[test]
    fn flags_override() {
        let args = RelayArgs::try_parse_from([
            "aichat-relay",
            "--addr",
            "0.0.0.0:9000",
            "--default-model",
            "deepseek/deepseek-chat",
            "--log-json",
        ])
        .unwrap();
        assert_eq!(args.addr.to_string(), "0.0.0.0:9000");
        assert_eq!(args.default_model.as_deref(), Some("deepseek/deepseek-chat"));
        assert!(args.log_json);
    }
}
