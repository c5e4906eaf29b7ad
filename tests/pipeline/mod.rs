mod backfill;
mod restart;
mod runner;
mod tip;
