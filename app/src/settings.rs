//! Compile-time defaults loaded via `toml-cfg` from `cfg.toml`.

#[toml_cfg::toml_config]
pub struct Settings {
    #[default("0.0.0.0:0")]
    pub bind_addr: &'static str,
    #[default(5060)]
    pub registrar_port: u16,
    #[default("6002")]
    pub call_target: &'static str,
    #[default(4000)]
    pub rtp_port: u16,
    #[default("0.0.0.0:5060")]
    pub server_bind: &'static str,
}
