use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    // 应用信息
    pub app_name: &'static str,
    pub app_version: &'static str,

    // 音频配置
    pub capture_device: &'static str,
    pub playback_device: &'static str,
    pub sample_rate: u32,
    pub channels: u32,
    pub capture_block_size: usize,
    pub playback_period_size: usize,

    // 显示进程配置
    pub display_local_port: u16,
    pub display_remote_port: u16,

    // 网络配置（静态部分）
    pub ws_url: &'static str,

    // 客户端标识（动态部分，每次启动生成）
    pub client_id: String,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            // 音频配置
            capture_device: env!("CAPTURE_DEVICE"),
            playback_device: env!("PLAYBACK_DEVICE"),
            sample_rate: env!("SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse SAMPLE_RATE")?,
            channels: env!("CHANNELS").parse()
                .map_err(|_| "Failed to parse CHANNELS")?,
            capture_block_size: env!("CAPTURE_BLOCK_SIZE").parse()
                .map_err(|_| "Failed to parse CAPTURE_BLOCK_SIZE")?,
            playback_period_size: env!("PLAYBACK_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse PLAYBACK_PERIOD_SIZE")?,

            // 显示进程配置
            display_local_port: env!("DISPLAY_LOCAL_PORT").parse()
                .map_err(|_| "Failed to parse DISPLAY_LOCAL_PORT")?,
            display_remote_port: env!("DISPLAY_REMOTE_PORT").parse()
                .map_err(|_| "Failed to parse DISPLAY_REMOTE_PORT")?,

            // 网络配置
            ws_url: env!("WS_URL"),

            // 客户端标识在 main 中填充
            client_id: String::new(),
        })
    }
}
