pub mod agent;
pub mod cathedral;
pub mod checkout;
pub mod project;
pub mod vcs;
pub mod work;
