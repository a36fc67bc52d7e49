pub mod nl2sql;
