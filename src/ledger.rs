//! The ledger facade: the standard set of entities over one storage root.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::core::Result;
use crate::rates::{FixedRates, RateLookup};
use crate::schemas;
use crate::settings::Settings;
use crate::storage::{
    BalancePolicy, DirectoryEntity, JournalEntity, SingleFileEntity, Transaction,
};

/// A file-based ledger rooted at one directory:
///
/// ```text
/// <root>/
///   settings.json
///   accounts.csv
///   tax_codes.csv
///   assets.csv
///   revaluations.csv
///   price/<partition>.csv
///   journal/<partition>.csv
/// ```
pub struct TextLedger {
    root: PathBuf,
    settings: Settings,
    rates: Arc<dyn RateLookup>,
    accounts: SingleFileEntity,
    tax_codes: SingleFileEntity,
    assets: SingleFileEntity,
    revaluations: SingleFileEntity,
    price: DirectoryEntity,
    journal: JournalEntity,
}

impl TextLedger {
    /// Open (or initialize) a ledger at `root` with a fixed 1:1 rate table.
    /// Suitable for single-currency ledgers; multi-currency callers should
    /// use [`TextLedger::open_with_rates`].
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let settings = Settings::load(&root)?;
        let rates = Arc::new(FixedRates::new(&settings.reporting_currency));
        Self::build(root, settings, rates)
    }

    pub fn open_with_rates(
        root: impl Into<PathBuf>,
        rates: Arc<dyn RateLookup>,
    ) -> Result<Self> {
        let root = root.into();
        let settings = Settings::load(&root)?;
        Self::build(root, settings, rates)
    }

    fn build(root: PathBuf, settings: Settings, rates: Arc<dyn RateLookup>) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "opening ledger");
        let journal = JournalEntity::new(
            &root,
            schemas::journal(),
            "journal",
            Self::policy(&settings, &rates),
        );
        Ok(Self {
            accounts: SingleFileEntity::new(&root, schemas::accounts(), "accounts.csv"),
            tax_codes: SingleFileEntity::new(&root, schemas::tax_codes(), "tax_codes.csv"),
            assets: SingleFileEntity::new(&root, schemas::assets(), "assets.csv"),
            revaluations: SingleFileEntity::new(
                &root,
                schemas::revaluations(),
                "revaluations.csv",
            ),
            price: DirectoryEntity::new(&root, schemas::price(), "price"),
            journal,
            root,
            settings,
            rates,
        })
    }

    fn policy(settings: &Settings, rates: &Arc<dyn RateLookup>) -> BalancePolicy {
        BalancePolicy {
            reporting_currency: settings.reporting_currency.clone(),
            tolerance: settings.balance_tolerance,
            rates: Arc::clone(rates),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn reporting_currency(&self) -> &str {
        &self.settings.reporting_currency
    }

    /// Change the reporting currency, persisting the settings file and
    /// re-deriving the journal balance policy.
    pub fn set_reporting_currency(&mut self, currency: impl Into<String>) -> Result<()> {
        self.settings.reporting_currency = currency.into();
        self.settings.save(&self.root)?;
        self.journal
            .set_policy(Self::policy(&self.settings, &self.rates));
        Ok(())
    }

    pub fn accounts(&mut self) -> &mut SingleFileEntity {
        &mut self.accounts
    }

    pub fn tax_codes(&mut self) -> &mut SingleFileEntity {
        &mut self.tax_codes
    }

    pub fn assets(&mut self) -> &mut SingleFileEntity {
        &mut self.assets
    }

    pub fn revaluations(&mut self) -> &mut SingleFileEntity {
        &mut self.revaluations
    }

    pub fn price(&mut self) -> &mut DirectoryEntity {
        &mut self.price
    }

    pub fn journal(&mut self) -> &mut JournalEntity {
        &mut self.journal
    }

    /// Grouped journal view.
    pub fn transactions(&self) -> Result<Vec<Transaction>> {
        self.journal.transactions()
    }
}
