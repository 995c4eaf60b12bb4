pub mod check_readiness;
