//! Bounded inscription pager
//!
//! Ordinal-aware wallets return inscriptions one page at a time. Paging
//! stops on a short or empty page; a wallet that keeps returning full pages
//! past the iteration cap is treated as misbehaving.

use std::future::Future;

use crate::error::WalletError;
use crate::types::InscriptionIdentifier;

/// Inscriptions requested per page
pub const INSCRIPTION_PAGE_SIZE: usize = 100;

/// Maximum number of pages fetched before giving up
pub const INSCRIPTION_MAX_ITERATIONS: usize = 100;

/// Collect every inscription through `fetch_page(cursor, size)`
pub async fn collect_inscriptions<F, Fut>(
    wallet: &str,
    fetch_page: F,
) -> Result<Vec<InscriptionIdentifier>, WalletError>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = Result<Vec<InscriptionIdentifier>, WalletError>>,
{
    collect_inscriptions_bounded(
        wallet,
        INSCRIPTION_PAGE_SIZE,
        INSCRIPTION_MAX_ITERATIONS,
        fetch_page,
    )
    .await
}

/// [`collect_inscriptions`] with explicit page size and iteration cap
pub async fn collect_inscriptions_bounded<F, Fut>(
    wallet: &str,
    page_size: usize,
    max_iterations: usize,
    fetch_page: F,
) -> Result<Vec<InscriptionIdentifier>, WalletError>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = Result<Vec<InscriptionIdentifier>, WalletError>>,
{
    let mut pager = InscriptionPager::new(wallet, page_size, max_iterations, fetch_page);
    let mut inscriptions = Vec::new();
    while let Some(page) = pager.next_page().await {
        inscriptions.extend(page?);
    }
    Ok(inscriptions)
}

/// Lazy page-by-page view over a wallet's inscriptions
///
/// Nothing is fetched until [`InscriptionPager::next_page`] is awaited. The
/// sequence ends after a short page, after a fetch error, or with
/// `MaxIterationExceeded` once `max_iterations` full pages were returned.
pub struct InscriptionPager<F> {
    wallet: String,
    page_size: usize,
    max_iterations: usize,
    fetch_page: F,
    cursor: usize,
    iterations: usize,
    finished: bool,
}

impl<F, Fut> InscriptionPager<F>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = Result<Vec<InscriptionIdentifier>, WalletError>>,
{
    pub fn new(wallet: &str, page_size: usize, max_iterations: usize, fetch_page: F) -> Self {
        Self {
            wallet: wallet.to_string(),
            page_size,
            max_iterations,
            fetch_page,
            cursor: 0,
            iterations: 0,
            finished: false,
        }
    }

    /// Pages fetched so far
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Fetch the next page, `None` once the sequence has ended
    pub async fn next_page(&mut self) -> Option<Result<Vec<InscriptionIdentifier>, WalletError>> {
        if self.finished {
            return None;
        }
        if self.iterations >= self.max_iterations {
            self.finished = true;
            log::warn!(
                "{}: inscription paging exceeded {} iterations",
                self.wallet,
                self.max_iterations
            );
            return Some(Err(WalletError::MaxIterationExceeded {
                wallet: self.wallet.clone(),
                max: self.max_iterations,
            }));
        }

        let page = match (self.fetch_page)(self.cursor, self.page_size).await {
            Ok(page) => page,
            Err(e) => {
                self.finished = true;
                return Some(Err(e));
            }
        };
        let fetched = page.len();
        log::debug!(
            "{}: inscription page {} returned {} entries",
            self.wallet,
            self.iterations,
            fetched
        );

        self.iterations += 1;
        self.cursor += fetched;
        if fetched < self.page_size {
            self.finished = true;
        }
        Some(Ok(page))
    }
}
