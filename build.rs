use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    audio: Audio,
    display: Display,
    network: Network,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
    sample_rate: u32,
    channels: u32,
    capture_block_size: usize,
    playback_period_size: usize,
}

#[derive(Deserialize)]
struct Display {
    local_port: u16,
    remote_port: u16,
}

#[derive(Deserialize)]
struct Network {
    ws_url: String,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 应用信息
    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 音频配置
    println!("cargo:rustc-env=CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=SAMPLE_RATE={}", config.audio.sample_rate);
    println!("cargo:rustc-env=CHANNELS={}", config.audio.channels);
    println!("cargo:rustc-env=CAPTURE_BLOCK_SIZE={}", config.audio.capture_block_size);
    println!("cargo:rustc-env=PLAYBACK_PERIOD_SIZE={}", config.audio.playback_period_size);

    // 显示进程配置
    println!("cargo:rustc-env=DISPLAY_LOCAL_PORT={}", config.display.local_port);
    println!("cargo:rustc-env=DISPLAY_REMOTE_PORT={}", config.display.remote_port);

    // 网络配置
    println!("cargo:rustc-env=WS_URL={}", config.network.ws_url);
}
