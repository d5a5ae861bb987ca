pub mod coingecko;
pub mod coinmarketcap;
pub mod fetcher;
pub mod market;
pub mod news;
