pub mod fx_normalization;
