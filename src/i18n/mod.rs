//! 多语言错误消息模块
//!
//! 使用rat_embed_lang框架为连接池自身产生的错误提供多语言消息

use rat_embed_lang::register_translations;
use std::collections::HashMap;

/// 错误消息翻译注册器
pub struct ErrorMessageI18n;

impl ErrorMessageI18n {
    /// 注册所有错误消息翻译
    pub fn register_all_translations() {
        let mut translations = HashMap::new();

        // 熔断器打开
        let mut circuit_open = HashMap::new();
        circuit_open.insert("zh-CN".to_string(), "熔断器已打开，约 {remaining_ms}ms 后允许探测".to_string());
        circuit_open.insert("en-US".to_string(), "Circuit breaker is open, probing allowed in about {remaining_ms}ms".to_string());
        circuit_open.insert("ja-JP".to_string(), "サーキットブレーカーが開いています。約 {remaining_ms}ms 後に試行可能です".to_string());
        translations.insert("error.circuit_open".to_string(), circuit_open);

        // 连接池关闭中
        let mut shutting_down = HashMap::new();
        shutting_down.insert("zh-CN".to_string(), "连接池正在关闭".to_string());
        shutting_down.insert("en-US".to_string(), "Connection pool is shutting down".to_string());
        shutting_down.insert("ja-JP".to_string(), "接続プールはシャットダウン中です".to_string());
        translations.insert("error.pool_shutting_down".to_string(), shutting_down);

        // 排队超时
        let mut queue_timeout = HashMap::new();
        queue_timeout.insert("zh-CN".to_string(), "等待可用连接超时（已等待 {waited_ms}ms）".to_string());
        queue_timeout.insert("en-US".to_string(), "Timed out waiting for a connection after {waited_ms}ms".to_string());
        queue_timeout.insert("ja-JP".to_string(), "接続の待機がタイムアウトしました（{waited_ms}ms 待機）".to_string());
        translations.insert("error.queue_timeout".to_string(), queue_timeout);

        // 初始化失败
        let mut init_failed = HashMap::new();
        init_failed.insert("zh-CN".to_string(), "Schema初始化失败: {message}".to_string());
        init_failed.insert("en-US".to_string(), "Schema initialization failed: {message}".to_string());
        init_failed.insert("ja-JP".to_string(), "スキーマの初期化に失敗しました: {message}".to_string());
        translations.insert("error.init_failed".to_string(), init_failed);

        // 尚未初始化
        let mut not_initialized = HashMap::new();
        not_initialized.insert("zh-CN".to_string(), "数据库尚未初始化".to_string());
        not_initialized.insert("en-US".to_string(), "Database has not been initialized".to_string());
        not_initialized.insert("ja-JP".to_string(), "データベースはまだ初期化されていません".to_string());
        translations.insert("error.not_initialized".to_string(), not_initialized);

        // 配置错误
        let mut config_errors = HashMap::new();
        config_errors.insert("zh-CN".to_string(), "配置错误: {message}".to_string());
        config_errors.insert("en-US".to_string(), "Configuration error: {message}".to_string());
        config_errors.insert("ja-JP".to_string(), "設定エラー: {message}".to_string());
        translations.insert("error.config".to_string(), config_errors);

        register_translations(translations);
    }

    /// 初始化错误消息多语言支持
    pub fn init() {
        Self::register_all_translations();

        // 从环境变量获取语言设置，默认为zh-CN
        let lang = std::env::var("RAT_LANG")
            .or_else(|_| std::env::var("LANG"))
            .unwrap_or_else(|_| "zh-CN".to_string());

        use rat_embed_lang::normalize_language_code;
        let normalized_lang = normalize_language_code(&lang);
        set_language(&normalized_lang);
    }
}

/// 重新导出rat_embed_lang的核心函数
pub use rat_embed_lang::{current_language, set_language, t, tf};
