//! Everything a command needs: the loaded configuration and a session

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};

use super::app::Globals;
use super::output::Output;
use crate::config::{Config, DEFAULT_STATE_DIR};
use crate::deploy::{Deployer, Settings};
use crate::domain::ProcessEnv;
use crate::remote::http::ReqwestProbe;
use crate::remote::local::LocalCloud;
use crate::remote::{Clock, HttpProbe, Session, SystemClock};

pub struct Workspace {
    pub config: Config,
    session: Session,
    settings: Settings,
    env: ProcessEnv,
}

impl Workspace {
    pub fn open(globals: &Globals, output: &Output) -> Result<Self> {
        let config = Config::load(&globals.config)
            .with_context(|| format!("Failed to load {}", globals.config.display()))?;
        output.verbose_ctx(
            "config",
            &format!(
                "Loaded {} stacks and {} plans from {}",
                config.stacks.len(),
                config.plans.len(),
                globals.config.display()
            ),
        );

        let vars = config.environment_vars(globals.environment.as_deref())?;
        let state_dir = state_dir(globals.state_dir.as_deref(), &config.root);
        output.verbose_ctx("session", &format!("Using state in {}", state_dir.display()));

        let clock: Rc<dyn Clock> = Rc::new(SystemClock);
        let http: Rc<dyn HttpProbe> = Rc::new(ReqwestProbe::new()?);
        let cloud = Rc::new(LocalCloud::new(state_dir, clock.clone()));
        let session = Session::uniform(cloud, http, clock);

        let settings = Settings {
            dry_run: globals.dry_run,
            mask_passwords: globals.mask_passwords || config.password_noecho,
            // The local backend applies changes before returning
            settle: Duration::ZERO,
            vars,
        };

        Ok(Self {
            config,
            session,
            settings,
            env: ProcessEnv,
        })
    }

    pub fn deployer(&self) -> Deployer<'_> {
        Deployer::new(
            &self.config.stacks,
            self.session.clone(),
            &self.env,
            self.settings.clone(),
        )
    }
}

fn state_dir(flag: Option<&Path>, root: &Path) -> PathBuf {
    flag.map(Path::to_path_buf)
        .unwrap_or_else(|| root.join(DEFAULT_STATE_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_lives_next_to_the_config_by_default() {
        assert_eq!(
            state_dir(None, Path::new("infra")),
            PathBuf::from("infra/.strata")
        );
        assert_eq!(
            state_dir(Some(Path::new("/tmp/state")), Path::new("infra")),
            PathBuf::from("/tmp/state")
        );
    }
}
