//! JSON-lines record of a benchmark run: what was run, where, with which
//! build, and the numbers it produced.

use crate::bench::RunStatistics;

use json::JsonValue;
use std::collections::BTreeMap;
use std::env;
use std::ffi::OsStr;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const ENV_PREFIXES: [&str; 3] = ["LAMELLAR", "SLURM", "HISTO"];

pub struct RunRecord {
    pub benchmark_name: String,
    executable: PathBuf,
    parameters: Vec<String>,
    run_date: String,
    output: BTreeMap<String, String>,
    git_commit: String,
    system: BTreeMap<String, String>,
    environment_vars: BTreeMap<String, String>,
}

impl RunRecord {
    /// A record named after the running executable.
    pub fn new() -> Self {
        Self::with_name(&default_benchmark_name())
    }

    pub fn with_name(benchmark_name: &str) -> Self {
        RunRecord {
            benchmark_name: benchmark_name.to_string(),
            executable: executable(),
            parameters: env::args().skip(1).collect(),
            run_date: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            output: BTreeMap::new(),
            git_commit: env!("GIT_COMMIT_HASH").to_string(),
            system: system_info(),
            environment_vars: collect_env_vars(&ENV_PREFIXES),
        }
    }

    pub fn with_output(&mut self, key: &str, value: String) {
        self.output.insert(key.to_string(), value);
    }

    /// Adds the outputs of a finished run.
    pub fn with_statistics(&mut self, stats: &RunStatistics) {
        let config = &stats.config;
        self.with_output("backend", stats.backend.to_string());
        self.with_output("num_pes", stats.num_ranks.to_string());
        self.with_output("updates_per_pe", config.updates_per_rank.to_string());
        self.with_output("updates_total", config.total_updates(stats.num_ranks).to_string());
        self.with_output("table_size_per_pe", config.slots_per_rank.to_string());
        self.with_output("pattern", format!("{:?}", config.pattern));
        self.with_output("runs", stats.runs_completed().to_string());
        for (i, timing) in stats.runs.iter().enumerate() {
            self.with_output(&format!("run{i}_mean_secs"), timing.mean_secs.to_string());
            self.with_output(&format!("run{i}_gmups"), stats.global_mups(timing).to_string());
        }
        self.with_output("mean_secs", stats.mean_secs().to_string());
        self.with_output("total_errors", stats.verification.total_errors.to_string());
        self.with_output("passed", stats.passed().to_string());
    }

    pub fn as_json(&self) -> JsonValue {
        json::object! {
            "benchmark name" => self.benchmark_name.clone(),
            "executable" => self.executable.to_string_lossy().to_string(),
            "parameters" => self.parameters.clone(),
            "run_date" => self.run_date.clone(),
            "output" => to_json(&self.output),
            "git_commit" => self.git_commit.clone(),
            "system" => to_json(&self.system),
            "environment" => to_json(&self.environment_vars),
        }
    }

    /// Appends the record as one line, creating the file and its parent
    /// directories when needed.
    pub fn write(&self, file: &Path) -> std::io::Result<()> {
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = OpenOptions::new().create(true).append(true).open(file)?;
        writeln!(f, "{}", json::stringify(self.as_json()))
    }

    /// `<root>/<benchmark>_<slurm job or timestamp>_result.jsonl`
    pub fn default_output_path(&self, root: &Path) -> PathBuf {
        let time = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let id = self
            .environment_vars
            .get("SLURM_JOB_ID")
            .cloned()
            .unwrap_or(time);
        root.join(format!("{}_{id}_result.jsonl", self.benchmark_name))
    }
}

impl Default for RunRecord {
    fn default() -> Self {
        Self::new()
    }
}

fn to_json(map: &BTreeMap<String, String>) -> JsonValue {
    let mut obj = JsonValue::new_object();
    for (k, v) in map {
        obj[k.as_str()] = v.clone().into();
    }
    obj
}

fn collect_env_vars(prefixes: &[&str]) -> BTreeMap<String, String> {
    env::vars()
        .filter(|(key, _)| prefixes.iter().any(|p| key.starts_with(p)))
        .collect()
}

fn system_info() -> BTreeMap<String, String> {
    let mut info = BTreeMap::new();
    let sys = sysinfo::System::new_all();
    if let Some(hostname) = sysinfo::System::host_name() {
        info.insert("hostname".to_string(), hostname);
    }
    if let Some(os_name) = sysinfo::System::name() {
        info.insert("os_name".to_string(), os_name);
    }
    if let Some(kernel_version) = sysinfo::System::kernel_version() {
        info.insert("kernel_version".to_string(), kernel_version);
    }
    info.insert("cpu_cores".to_string(), sys.cpus().len().to_string());
    if let Some(cpu) = sys.cpus().first() {
        info.insert("cpu_brand".to_string(), cpu.brand().to_string());
    }
    info.insert("ram_bytes".to_string(), sys.total_memory().to_string());
    info
}

fn executable() -> PathBuf {
    env::current_exe().unwrap_or(PathBuf::from("__unknown__"))
}

pub fn default_benchmark_name() -> String {
    executable()
        .file_stem()
        .unwrap_or(OsStr::new("__unknown__"))
        .to_string_lossy()
        .to_string()
}
