use crate::controller::JobRequest;
use crate::proto::job_config::{CodeInput, JobKv, SpdxInput};
use crate::proto::JobConfig;
use crate::store::{Job, JobPathConfig};

/// Directory an agent writes a job's code output to.
pub fn code_dir(job_id: u32) -> String {
    format!("/code/{}/", job_id)
}

/// Directory an agent writes a job's SPDX output to.
pub fn spdx_dir(job_id: u32) -> String {
    format!("/spdx/{}/", job_id)
}

fn resolve(input: &JobPathConfig, dir: fn(u32) -> String) -> String {
    match input.prior() {
        Some(prior) => dir(prior),
        None => input.value.clone(),
    }
}

/// Build the wire configuration sent to an agent when starting `job`.
///
/// Inputs that reference a prior job read from that job's output directory;
/// all others use their configured value. A missing job yields an empty
/// configuration.
pub fn build_job_config(job: Option<&Job>) -> JobConfig {
    let Some(job) = job else {
        return JobConfig::default();
    };

    let code_inputs = job
        .config
        .code_reader
        .iter()
        .map(|(source, input)| CodeInput {
            source: source.clone(),
            path: resolve(input, code_dir),
        })
        .collect();

    let spdx_inputs = job
        .config
        .spdx_reader
        .iter()
        .map(|(source, input)| SpdxInput {
            source: source.clone(),
            path: resolve(input, spdx_dir),
        })
        .collect();

    let jkvs = job
        .config
        .kv
        .iter()
        .map(|(key, value)| JobKv {
            key: key.clone(),
            value: value.clone(),
        })
        .collect();

    JobConfig {
        code_inputs,
        spdx_inputs,
        code_output_dir: code_dir(job.id),
        spdx_output_dir: spdx_dir(job.id),
        jkvs,
    }
}

impl JobRequest {
    /// Request for dispatching `job` to its assigned agent.
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            agent_id: job.agent_id,
            cfg: build_job_config(Some(job)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JobConfig as StoredConfig;

    fn job(id: u32, config: StoredConfig) -> Job {
        Job::new(id, 1, config)
    }

    #[test]
    fn missing_job_yields_empty_config() {
        assert_eq!(build_job_config(None), JobConfig::default());
    }

    #[test]
    fn output_dirs_derive_from_job_id() {
        let cfg = build_job_config(Some(&job(42, StoredConfig::default())));
        assert_eq!(cfg.code_output_dir, "/code/42/");
        assert_eq!(cfg.spdx_output_dir, "/spdx/42/");
        assert!(cfg.code_inputs.is_empty());
        assert!(cfg.spdx_inputs.is_empty());
        assert!(cfg.jkvs.is_empty());
    }

    #[test]
    fn prior_job_inputs_resolve_to_output_dirs() {
        let stored = StoredConfig::default()
            .with_code_input("primary", JobPathConfig::prior_job(3))
            .with_spdx_input("scan", JobPathConfig::prior_job(5));
        let cfg = build_job_config(Some(&job(9, stored)));

        assert_eq!(
            cfg.code_inputs,
            vec![CodeInput {
                source: "primary".to_string(),
                path: "/code/3/".to_string(),
            }]
        );
        assert_eq!(
            cfg.spdx_inputs,
            vec![SpdxInput {
                source: "scan".to_string(),
                path: "/spdx/5/".to_string(),
            }]
        );
    }

    #[test]
    fn literal_inputs_are_used_verbatim() {
        let stored = StoredConfig::default()
            .with_code_input("git", JobPathConfig::value("https://example.com/repo.git"))
            .with_spdx_input("upload", JobPathConfig::value("/uploads/abc.spdx"));
        let cfg = build_job_config(Some(&job(2, stored)));

        assert_eq!(cfg.code_inputs[0].path, "https://example.com/repo.git");
        assert_eq!(cfg.spdx_inputs[0].path, "/uploads/abc.spdx");
    }

    #[test]
    fn zero_prior_job_falls_back_to_value() {
        let stored = StoredConfig::default().with_code_input(
            "git",
            JobPathConfig {
                prior_job_id: Some(0),
                value: "https://x".to_string(),
            },
        );
        let cfg = build_job_config(Some(&job(2, stored)));
        assert_eq!(cfg.code_inputs[0].path, "https://x");
    }

    #[test]
    fn inputs_and_kvs_are_ordered_by_name() {
        let stored = StoredConfig::default()
            .with_code_input("zeta", JobPathConfig::value("z"))
            .with_code_input("alpha", JobPathConfig::value("a"))
            .with_kv("policy", "strict")
            .with_kv("branch", "main");
        let cfg = build_job_config(Some(&job(1, stored)));

        let sources: Vec<&str> = cfg.code_inputs.iter().map(|c| c.source.as_str()).collect();
        assert_eq!(sources, vec!["alpha", "zeta"]);

        let kvs: Vec<(&str, &str)> = cfg
            .jkvs
            .iter()
            .map(|kv| (kv.key.as_str(), kv.value.as_str()))
            .collect();
        assert_eq!(kvs, vec![("branch", "main"), ("policy", "strict")]);
    }

    #[test]
    fn request_from_job_carries_ids() {
        let stored =
            StoredConfig::default().with_code_input("git", JobPathConfig::value("https://x"));
        let mut j = job(7, stored);
        j.agent_id = 4;

        let req = JobRequest::from_job(&j);
        assert_eq!(req.job_id, 7);
        assert_eq!(req.agent_id, 4);
        assert_eq!(req.cfg.code_output_dir, "/code/7/");
        assert_eq!(req.cfg.code_inputs.len(), 1);
    }
}
