mod recovery_tests;
mod transaction_tests;
