use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::state::{self, PluginState};
use super::{
    Ack, MODULE_SUFFIX, Plugin, PluginApis, PluginCatalog, PluginError, PluginMetadata, camelize,
    construct, guarded, read_metadata,
};
use crate::{debug, error, info, warn};

/// 插件记录
///
/// 不变量: `enable ⇒ initialized ⇒ loaded`
pub struct PluginRecord {
    /// 模块名，唯一标识
    pub module_name: String,
    /// 由模块名推导的类名
    pub class_name: String,
    /// 持久化的期望状态
    pub should_enable: bool,
    /// 当前是否启用
    pub enable: bool,
    pub loaded: bool,
    pub initialized: bool,
    pub metadata: PluginMetadata,
    /// 内置插件不需要插件目录中的模块，也不写入状态文件
    pub builtin: bool,
    instance: Option<Arc<dyn Plugin>>,
}

impl PluginRecord {
    fn new(module_name: &str, should_enable: bool) -> Self {
        Self {
            module_name: module_name.to_string(),
            class_name: camelize(module_name),
            should_enable,
            enable: false,
            loaded: false,
            initialized: false,
            metadata: PluginMetadata::default(),
            builtin: false,
            instance: None,
        }
    }

    pub fn instance(&self) -> Option<&Arc<dyn Plugin>> {
        self.instance.as_ref()
    }

    /// 显示名，未加载时使用类名
    pub fn display_name(&self) -> &str {
        if self.metadata.name.is_empty() {
            &self.class_name
        } else {
            &self.metadata.name
        }
    }

    pub fn is_consistent(&self) -> bool {
        (!self.enable || self.initialized) && (!self.initialized || self.loaded)
    }

    fn matches(&self, query: &str) -> bool {
        (!self.metadata.name.is_empty() && self.metadata.name == query)
            || self.class_name == query
            || self.module_name == query
    }

    fn reset(&mut self) {
        self.instance = None;
        self.loaded = false;
        self.initialized = false;
        self.metadata = PluginMetadata::default();
    }
}

/// 插件注册表与加载器
///
/// 记录的顺序即事件分发顺序。
pub struct PluginManager {
    plugin_dir: PathBuf,
    state_file: PathBuf,
    catalog: PluginCatalog,
    apis: PluginApis,
    records: Vec<PluginRecord>,
}

impl PluginManager {
    pub fn new<P: AsRef<Path>, S: AsRef<Path>>(
        plugin_dir: P,
        state_file: S,
        catalog: PluginCatalog,
        apis: PluginApis,
    ) -> Self {
        Self {
            plugin_dir: plugin_dir.as_ref().to_path_buf(),
            state_file: state_file.as_ref().to_path_buf(),
            catalog,
            apis,
            records: Vec::new(),
        }
    }

    pub fn records(&self) -> &[PluginRecord] {
        &self.records
    }

    /// 注册内置插件，排在最前
    pub fn register_builtin<F>(&mut self, module_name: &str, factory: F)
    where
        F: Fn(PluginApis) -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        if self.position(module_name).is_some() {
            return;
        }
        let mut record = PluginRecord::new(module_name, true);
        record.builtin = true;
        self.catalog.register(&record.class_name, factory);
        self.records.insert(0, record);
    }

    /// 读取状态文件，按记录顺序建立注册表
    pub async fn load_persisted_state(&mut self) -> usize {
        let states = match state::load(&self.state_file).await {
            Ok(states) => states,
            Err(e) => {
                error!(target: "Plugin", "读取插件状态失败: {}", e);
                return 0;
            }
        };

        let mut added = 0;
        for s in states {
            if self.position(&s.module_name).is_some() {
                continue;
            }
            self.records
                .push(PluginRecord::new(&s.module_name, s.should_enable));
            added += 1;
        }
        debug!(target: "Plugin", "从状态文件载入 {} 个插件", added);
        added
    }

    /// 扫描插件目录，追加尚未登记的模块 (按模块名排序)
    pub async fn discover_local_modules(&mut self) -> usize {
        let modules = match list_modules(&self.plugin_dir).await {
            Ok(m) => m,
            Err(e) => {
                warn!(target: "Plugin", "无法读取插件目录 {}: {}", self.plugin_dir.display(), e);
                return 0;
            }
        };

        let mut added = 0;
        for module_name in modules {
            if self.position(&module_name).is_some() {
                continue;
            }
            debug!(target: "Plugin", "发现新插件: {}", module_name);
            self.records.push(PluginRecord::new(&module_name, true));
            added += 1;
        }
        added
    }

    /// 写入状态文件 (不含内置插件)
    pub async fn persist_state(&self) -> bool {
        let states: Vec<PluginState> = self
            .records
            .iter()
            .filter(|r| !r.builtin)
            .map(|r| PluginState {
                module_name: r.module_name.clone(),
                should_enable: r.should_enable,
            })
            .collect();

        match state::save(&self.state_file, &states).await {
            Ok(()) => true,
            Err(e) => {
                error!(target: "Plugin", "保存插件状态失败: {}", e);
                false
            }
        }
    }

    /// 加载插件：导入模块、解析类、构造实例、校验元数据，随后调用 on_initialize
    ///
    /// 失败时记录保持未加载状态；on_initialize 未确认时插件保持已加载但未初始化。
    pub async fn initialize_module(&mut self, idx: usize) -> Result<(), PluginError> {
        let Some(record) = self.records.get_mut(idx) else {
            return Err(PluginError::NotLoaded(idx.to_string()));
        };
        if record.enable {
            return Err(PluginError::Hook(format!(
                "{} 仍处于启用状态",
                record.class_name
            )));
        }
        record.reset();

        let module_name = record.module_name.clone();
        let class_name = record.class_name.clone();
        let builtin = record.builtin;

        if !builtin && !module_exists(&self.plugin_dir, &module_name).await {
            return Err(PluginError::ModuleNotFound(module_name));
        }

        let factory = self
            .catalog
            .get(&class_name)
            .ok_or_else(|| PluginError::ClassNotFound(class_name.clone()))?;

        debug!(target: "Plugin", "正在加载插件: {}", class_name);
        let plugin = construct(&factory, self.apis.clone())?;
        let metadata = read_metadata(plugin.as_ref(), &class_name)?;
        let instance: Arc<dyn Plugin> = Arc::from(plugin);

        let record = &mut self.records[idx];
        info!(
            target: "Plugin",
            "{} 已加载: {}({}) - {}",
            class_name, metadata.name, metadata.version, metadata.description
        );
        record.metadata = metadata;
        record.instance = Some(instance.clone());
        record.loaded = true;

        guarded(instance.on_initialize()).await?;
        self.records[idx].initialized = true;
        Ok(())
    }

    /// 加载所有尚未加载的插件，返回成功初始化的数量
    pub async fn initialize_all_modules(&mut self) -> usize {
        let mut count = 0;
        for idx in 0..self.records.len() {
            if self.records[idx].initialized {
                count += 1;
                continue;
            }
            match self.initialize_module(idx).await {
                Ok(()) => count += 1,
                Err(e) => {
                    error!(target: "Plugin", "插件 {} 初始化失败: {}", self.records[idx].class_name, e)
                }
            }
        }
        count
    }

    /// 启用所有期望启用的插件 (启动时)
    pub async fn enable_desired(&mut self) -> usize {
        let mut count = 0;
        for idx in 0..self.records.len() {
            let r = &self.records[idx];
            if r.should_enable && r.initialized && !r.enable && self.enable_inner(idx).await {
                count += 1;
            }
        }
        count
    }

    pub async fn enable_plugin(&mut self, query: &str) -> bool {
        let Some(idx) = self.position(query) else {
            warn!(target: "Plugin", "未找到插件: {}", query);
            return false;
        };
        self.records[idx].should_enable = true;
        let ok = self.enable_inner(idx).await;
        self.persist_state().await;
        ok
    }

    pub async fn disable_plugin(&mut self, query: &str) -> bool {
        let Some(idx) = self.position(query) else {
            warn!(target: "Plugin", "未找到插件: {}", query);
            return false;
        };
        self.records[idx].should_enable = false;
        let ok = self.disable_inner(idx).await;
        self.persist_state().await;
        ok
    }

    /// 禁用全部插件，不改变期望状态 (退出时)
    pub async fn disable_all(&mut self) {
        for idx in 0..self.records.len() {
            self.disable_inner(idx).await;
        }
    }

    /// 重载插件：必要时先禁用，丢弃旧实例并重新加载，成功后恢复启用
    pub async fn reinitialize_module(&mut self, query: &str) -> bool {
        let Some(idx) = self.position(query) else {
            warn!(target: "Plugin", "未找到插件: {}", query);
            return false;
        };

        let was_enabled = self.records[idx].enable;
        if was_enabled && !self.disable_inner(idx).await {
            error!(target: "Plugin", "{} 无法禁用，取消重载", self.records[idx].class_name);
            return false;
        }

        if let Err(e) = self.initialize_module(idx).await {
            error!(target: "Plugin", "插件 {} 重载失败: {}", self.records[idx].class_name, e);
            return false;
        }

        if was_enabled && !self.enable_inner(idx).await {
            return false;
        }

        info!(target: "Plugin", "{} 已重载", self.records[idx].class_name);
        true
    }

    pub async fn move_up(&mut self, query: &str) -> bool {
        match self.position(query) {
            Some(idx) if idx > 0 => {
                self.records.swap(idx, idx - 1);
                self.persist_state().await;
                true
            }
            _ => false,
        }
    }

    pub async fn move_down(&mut self, query: &str) -> bool {
        match self.position(query) {
            Some(idx) if idx + 1 < self.records.len() => {
                self.records.swap(idx, idx + 1);
                self.persist_state().await;
                true
            }
            _ => false,
        }
    }

    /// 按显示名、类名或模块名精确查找，按注册表顺序返回首个匹配
    pub fn get_plugin_by_name(&self, query: &str) -> Option<&PluginRecord> {
        self.records.iter().find(|r| r.matches(query))
    }

    fn position(&self, query: &str) -> Option<usize> {
        self.records.iter().position(|r| r.matches(query))
    }

    /// 已启用插件的快照 (类名, 实例)，按分发顺序
    pub fn enabled_plugins(&self) -> Vec<(String, Arc<dyn Plugin>)> {
        self.records
            .iter()
            .filter(|r| r.enable)
            .filter_map(|r| r.instance.clone().map(|p| (r.class_name.clone(), p)))
            .collect()
    }

    async fn enable_inner(&mut self, idx: usize) -> bool {
        let record = &self.records[idx];
        if record.enable {
            return true;
        }
        if !record.initialized {
            warn!(target: "Plugin", "{} 尚未初始化，无法启用", record.class_name);
            return false;
        }
        let Some(instance) = record.instance.clone() else {
            return false;
        };
        let class_name = record.class_name.clone();

        let ok = match guarded(instance.on_enable()).await {
            Ok(Ack) => true,
            Err(e) => {
                error!(target: "Plugin", "{} 启用失败: {}", class_name, e);
                false
            }
        };
        self.records[idx].enable = ok;
        if ok {
            info!(target: "Plugin", "已启用 {}", class_name);
        }
        ok
    }

    /// 禁用失败时保留钩子结果所对应的状态 (仍为启用)
    async fn disable_inner(&mut self, idx: usize) -> bool {
        let record = &self.records[idx];
        if !record.enable {
            return true;
        }
        let class_name = record.class_name.clone();
        let Some(instance) = record.instance.clone() else {
            self.records[idx].enable = false;
            return true;
        };

        if let Err(e) = guarded(instance.on_before_disable()).await {
            warn!(target: "Plugin", "{} 未准备好被禁用: {}", class_name, e);
        }

        match guarded(instance.on_disable()).await {
            Ok(Ack) => {
                self.records[idx].enable = false;
                info!(target: "Plugin", "已禁用 {}", class_name);
                true
            }
            Err(e) => {
                error!(target: "Plugin", "{} 禁用失败: {}", class_name, e);
                false
            }
        }
    }
}

/// 插件目录中以 `_kenko` 结尾的模块 (文件取主名，目录取全名)
pub async fn list_modules(dir: &Path) -> std::io::Result<BTreeSet<String>> {
    let mut modules = BTreeSet::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(stem) = Path::new(&name).file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem.starts_with('.') || !stem.ends_with(MODULE_SUFFIX) {
            continue;
        }
        modules.insert(stem.to_string());
    }
    Ok(modules)
}

async fn module_exists(dir: &Path, module_name: &str) -> bool {
    list_modules(dir)
        .await
        .map(|m| m.contains(module_name))
        .unwrap_or(false)
}
